//! CLI command definitions

use clap::{Parser, Subcommand};
use warden::auth::{SubjectId, TokenScope};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Scoped token issuance and permission checks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Token signing secret
    #[arg(long, env = "WARDEN_SECRET", global = true, hide_env_values = true)]
    pub secret: Option<String>,

    /// Token lifetime in seconds
    #[arg(long, env = "WARDEN_TOKEN_TTL", global = true)]
    pub token_ttl: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database schema
    Init,

    /// Show database status and statistics
    Status,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Log in, replacing any previous access token
    Login {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Confirm an email address with an activation token
    Activate {
        /// Activation token
        token: String,
    },

    /// Issue, inspect and revoke tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Manage permissions
    ///
    /// Examples:
    ///   warden permission grant 42 permissions:write
    ///   warden permission show 42
    Permission {
        #[command(subcommand)]
        command: PermissionCommands,
    },

    /// Check whether an access token holds a permission
    Authorize {
        /// Access token
        token: String,

        /// Required permission
        permission: String,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user and print their activation token
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Show user details
    Show {
        id: SubjectId,
    },

    /// Change a user's name and/or email
    Update {
        id: SubjectId,

        #[arg(long, required_unless_present = "email")]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Replace a user's password and sign them out
    Passwd {
        id: SubjectId,

        #[arg(long)]
        current: String,

        #[arg(long)]
        new: String,
    },

    /// Issue a fresh activation token, superseding the previous one
    Reactivate {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue and store a token for a subject
    Issue {
        subject: SubjectId,

        /// Token scope: ActivateEmail or UserAccess
        #[arg(short, long, value_parser = parse_scope, default_value = "UserAccess")]
        scope: TokenScope,

        /// Revoke the subject's other tokens of this scope first
        #[arg(long)]
        replace: bool,
    },

    /// Validate a token and print its claims
    Validate {
        token: String,
    },

    /// Revoke a single token, or every token of a scope for a subject
    ///
    /// Examples:
    ///   warden token revoke eyJhbGciOi...
    ///   warden token revoke --subject 42 --scope UserAccess
    Revoke {
        #[arg(required_unless_present = "subject")]
        token: Option<String>,

        #[arg(long, requires = "scope")]
        subject: Option<SubjectId>,

        #[arg(short, long, value_parser = parse_scope)]
        scope: Option<TokenScope>,
    },

    /// Delete stored tokens past their expiry
    Purge,
}

#[derive(Subcommand)]
pub enum PermissionCommands {
    /// Register permission names
    Create {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Grant permissions to a subject
    Grant {
        subject: SubjectId,

        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Revoke permissions from a subject
    Revoke {
        subject: SubjectId,

        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List a subject's permissions
    Show {
        subject: SubjectId,
    },
}

fn parse_scope(s: &str) -> Result<TokenScope, String> {
    s.parse::<TokenScope>()
        .map_err(|_| format!("Invalid scope: {}. Must be ActivateEmail or UserAccess", s))
}
