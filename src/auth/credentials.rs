//! Password credentials
//!
//! Secrets are hashed with Argon2id into a PHC string. The cleartext is never
//! kept; a credential is replaced wholesale on password change.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::fmt;
use thiserror::Error;

/// Minimum number of characters in a secret
pub const MIN_SECRET_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("password must be at least {min} characters long")]
    TooShort { min: usize },

    #[error("password hashing failed: {0}")]
    HashingFailure(String),
}

/// A hashed password in PHC string form
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    hash: String,
}

impl Credential {
    /// Hash `secret`, rejecting secrets shorter than [`MIN_SECRET_LEN`]
    pub fn hash(secret: &str) -> Result<Self, CredentialError> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(CredentialError::TooShort {
                min: MIN_SECRET_LEN,
            });
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| CredentialError::HashingFailure(e.to_string()))?;

        Ok(Self {
            hash: hash.to_string(),
        })
    }

    /// Wrap a previously stored hash
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Check `candidate` against this credential.
    ///
    /// A mismatch is `Ok(false)`. Errors are reserved for hashes that cannot
    /// be parsed or verified at all.
    pub fn verify(&self, candidate: &str) -> Result<bool, CredentialError> {
        let parsed = PasswordHash::new(&self.hash)
            .map_err(|e| CredentialError::HashingFailure(e.to_string()))?;

        match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CredentialError::HashingFailure(e.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential([REDACTED])")
    }
}
