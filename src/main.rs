//! Warden CLI entry point

mod cli;

use crate::cli::{Cli, Commands, PermissionCommands, TokenCommands, UserCommands};
use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warden::config::{parse_ttl, AuthConfig, SigningSecret, DEFAULT_TOKEN_TTL_SECS};
use warden::service::{AccountService, AuthorizationGate, PermissionService, TokenService};
use warden::storage::{PostgresConfig, PostgresStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Secret and ttl are only required by commands that sign or verify
    let auth_config = || -> Result<AuthConfig> {
        let secret = cli
            .secret
            .clone()
            .context("WARDEN_SECRET or --secret required")?;
        let ttl = match &cli.token_ttl {
            Some(raw) => parse_ttl(raw)?,
            None => Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        };
        Ok(AuthConfig::new(SigningSecret::new(secret)?, ttl))
    };

    let db_config = match &cli.database_url {
        Some(url) => PostgresConfig::from_url(url).context("Invalid DATABASE_URL")?,
        None => PostgresConfig::from_env().context("DATABASE_URL not set")?,
    };
    let store = Arc::new(
        PostgresStore::new(db_config)
            .await
            .context("Failed to connect to database")?,
    );

    match cli.command {
        Commands::Init => init(),
        Commands::Status => status(&store).await,
        Commands::User { command } => user(store, command, auth_config).await,
        Commands::Login { email, password } => {
            let config = auth_config()?;
            let token = accounts(&store)
                .login(&email, &password, &config)
                .await
                .context("Login failed")?;

            println!("{}", token);
            println!();
            println!("Expires: {}", token.expires_at());
            Ok(())
        }
        Commands::Activate { token } => {
            let config = auth_config()?;
            let header = format!("Bearer {}", token);
            let subject = accounts(&store)
                .activate_email(Some(&header), &config)
                .await
                .context("Activation failed")?;

            println!("Activated user {}", subject);
            Ok(())
        }
        Commands::Token { command } => token(store, command, auth_config).await,
        Commands::Permission { command } => permission(store, command).await,
        Commands::Authorize { token, permission } => {
            let config = auth_config()?;
            let gate = AuthorizationGate::new(TokenService::new(store.clone()), store.clone());

            match gate.authorize(&token, &permission, config.secret()).await {
                Ok(subject) => {
                    println!("allow: user {} holds {}", subject, permission);
                    Ok(())
                }
                Err(e) if e.is_server_error() => Err(e).context("Authorization check failed"),
                Err(e) => {
                    println!("deny: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn accounts(store: &Arc<PostgresStore>) -> AccountService {
    AccountService::new(store.clone(), TokenService::new(store.clone()))
}

async fn user<F>(store: Arc<PostgresStore>, command: UserCommands, auth_config: F) -> Result<()>
where
    F: FnOnce() -> Result<AuthConfig>,
{
    let accounts = accounts(&store);

    match command {
        UserCommands::Register {
            name,
            email,
            password,
        } => {
            let config = auth_config()?;
            let registration = accounts
                .register(&name, &email, &password, &config)
                .await
                .context("Registration failed")?;

            println!("Registered user {}", registration.user.id);
            println!("Activation token:");
            println!("{}", registration.activation_token);
        }
        UserCommands::Show { id } => {
            let user = accounts.get(id).await?;

            println!("User: {}", user.id);
            println!("Name: {}", user.name);
            println!("Email: {}", user.email);
            println!("Activated: {}", user.activated);
            println!("Created: {}", user.created_at);

            let permissions = PermissionService::new(store).load(id).await?;
            println!("Permissions:");
            if permissions.is_empty() {
                println!("  (none)");
            } else {
                for permission in permissions.iter() {
                    println!("  {}", permission);
                }
            }
        }
        UserCommands::Update { id, name, email } => {
            let user = accounts
                .update_profile(id, name.as_deref(), email.as_deref())
                .await
                .context("Profile update failed")?;

            println!("Updated user {}", user.id);
            println!("Name: {}", user.name);
            println!("Email: {}", user.email);
        }
        UserCommands::Passwd { id, current, new } => {
            accounts
                .change_password(id, &current, &new)
                .await
                .context("Password change failed")?;

            println!("Password changed for user {}; access tokens revoked", id);
        }
        UserCommands::Reactivate { email, password } => {
            let config = auth_config()?;
            let token = accounts
                .regenerate_activation_token(&email, &password, &config)
                .await
                .context("Failed to regenerate activation token")?;

            println!("{}", token);
        }
    }

    Ok(())
}

async fn token<F>(store: Arc<PostgresStore>, command: TokenCommands, auth_config: F) -> Result<()>
where
    F: FnOnce() -> Result<AuthConfig>,
{
    let tokens = TokenService::new(store.clone());

    match command {
        TokenCommands::Issue {
            subject,
            scope,
            replace,
        } => {
            let config = auth_config()?;
            let token = if replace {
                tokens
                    .rotate(subject, scope, config.token_ttl, config.secret())
                    .await?
            } else {
                let token = tokens.issue(subject, scope, config.token_ttl, config.secret())?;
                tokens.store(&token).await?;
                token
            };

            println!("{}", token);
            println!();
            println!("Subject: {}", subject);
            println!("Scope: {}", scope);
            println!("Expires: {}", token.expires_at());
        }
        TokenCommands::Validate { token } => {
            let config = auth_config()?;
            let claims = tokens
                .validate(&token, config.secret())
                .await
                .context("Invalid token")?;
            let live = tokens.is_live(&claims, &token).await?;

            println!("Subject: {}", claims.sub);
            println!("Scope: {}", claims.scope);
            match claims.expires_at() {
                Some(at) => println!("Expires: {}", at),
                None => println!("Expires: {}", claims.exp),
            }
            println!("Stored: {}", if live { "yes" } else { "no" });
        }
        TokenCommands::Revoke {
            token,
            subject,
            scope,
        } => match (subject, scope) {
            (Some(subject), Some(scope)) => {
                let removed = tokens.revoke_all(subject, scope).await?;
                println!("Revoked {} {} token(s) for user {}", removed, scope, subject);
            }
            _ => {
                let token = token.context("Token or --subject and --scope required")?;
                tokens.revoke(&token).await?;
                println!("Revoked token");
            }
        },
        TokenCommands::Purge => {
            let removed = store.purge_expired_tokens().await?;
            println!("Purged {} expired token(s)", removed);
        }
    }

    Ok(())
}

async fn permission(store: Arc<PostgresStore>, command: PermissionCommands) -> Result<()> {
    let permissions = PermissionService::new(store);

    match command {
        PermissionCommands::Create { names } => {
            for name in &names {
                let permission = permissions.create(name).await?;
                println!("Created {}", permission);
            }
        }
        PermissionCommands::Grant { subject, names } => {
            println!("Granted to user {}", subject);
            for name in &names {
                let permission = permissions.grant(subject, name).await?;
                println!("  + {}", permission);
            }
        }
        PermissionCommands::Revoke { subject, names } => {
            println!("Revoked from user {}", subject);
            for name in &names {
                let permission = permissions.revoke(subject, name).await?;
                println!("  - {}", permission);
            }
        }
        PermissionCommands::Show { subject } => {
            let set = permissions.load(subject).await?;

            println!("User: {}", subject);
            println!("Permissions:");
            if set.is_empty() {
                println!("  (none)");
            } else {
                for permission in set.iter() {
                    println!("  {}", permission);
                }
            }
        }
    }

    Ok(())
}

fn init() -> Result<()> {
    // Connecting already ensured the schema
    println!("Database schema initialized successfully");
    Ok(())
}

async fn status(store: &PostgresStore) -> Result<()> {
    let (users, tokens, permissions) = store.counts().await?;

    println!("Warden Status");
    println!("=============");
    println!("Database: Connected");
    println!("Users: {}", users);
    println!("Live tokens: {}", tokens);
    println!("Permissions: {}", permissions);

    Ok(())
}
