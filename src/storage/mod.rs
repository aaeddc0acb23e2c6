//! Storage backends for Warden
//!
//! - Postgres: durable storage for users, issued tokens and permissions
//! - Memory: in-process storage for embedding and tests

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};

use crate::auth::{Credential, Permission, PermissionSet, SubjectId, TokenScope};
pub use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// SHA-256 digest of a token string, hex encoded.
///
/// Stores only ever see this form, never the token itself.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn of(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Wrap a digest read back from storage
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix, safe to log
    pub fn prefix(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({}…)", self.prefix())
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One outstanding token grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub hash: TokenHash,
    pub subject: SubjectId,
    pub expires_at: DateTime<Utc>,
    pub scope: TokenScope,
}

impl IssuedToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// A registered identity
#[derive(Debug, Clone)]
pub struct User {
    pub id: SubjectId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub credential: Credential,
    pub activated: bool,
    pub version: i32,
}

/// A user about to be registered
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub credential: Credential,
}

/// Issued token persistence, partitioned by subject and scope
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a token. Inserting an already stored hash is a no-op.
    async fn insert(&self, token: IssuedToken) -> Result<IssuedToken, StorageError>;

    /// Delete a token by hash; deleting an unknown hash is not an error
    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<(), StorageError>;

    /// List all stored tokens of one scope for a subject
    async fn list_by_owner_and_scope(
        &self,
        subject: SubjectId,
        scope: TokenScope,
    ) -> Result<Vec<IssuedToken>, StorageError>;

    /// Delete all tokens of one scope for a subject, returning how many were removed
    async fn delete_all_by_owner_and_scope(
        &self,
        subject: SubjectId,
        scope: TokenScope,
    ) -> Result<u64, StorageError>;

    /// Atomically delete the row matching subject, scope and hash.
    ///
    /// Returns whether a row was deleted. Of any number of concurrent callers
    /// presenting the same row, at most one observes `true`.
    async fn consume(
        &self,
        subject: SubjectId,
        scope: TokenScope,
        hash: &TokenHash,
    ) -> Result<bool, StorageError>;
}

/// Subject to permission bindings
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Register a permission name; registering it twice is a no-op
    async fn create_permission(&self, permission: &Permission) -> Result<(), StorageError>;

    /// Bind a permission to a subject, registering the name if needed.
    /// Repeating a grant is a no-op.
    async fn grant(&self, subject: SubjectId, permission: &Permission) -> Result<(), StorageError>;

    /// Remove a binding; removing a missing binding is not an error
    async fn revoke(&self, subject: SubjectId, permission: &Permission)
        -> Result<(), StorageError>;

    /// All permissions held by a subject
    async fn load_for_subject(&self, subject: SubjectId) -> Result<PermissionSet, StorageError>;
}

/// User records
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Register a user; a duplicate email is a `Conflict`
    async fn insert_user(&self, user: NewUser) -> Result<User, StorageError>;

    async fn get_by_id(&self, id: SubjectId) -> Result<User, StorageError>;

    async fn get_by_email(&self, email: &str) -> Result<User, StorageError>;

    async fn update_activation_status(
        &self,
        id: SubjectId,
        activated: bool,
    ) -> Result<(), StorageError>;

    /// Replace name, email and credential.
    ///
    /// Fails with `Conflict` when `user.version` is stale. Returns the stored
    /// record with its new version.
    async fn update(&self, user: &User) -> Result<User, StorageError>;
}
