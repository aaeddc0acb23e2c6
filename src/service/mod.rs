//! Token lifecycle and authorization services
//!
//! Services hold no state of their own beyond handles to the stores, so they
//! are cheap to clone and share across requests.

mod accounts;
mod gate;
mod tokens;

pub use accounts::{AccountService, Registration};
pub use gate::{AuthorizationGate, PermissionService};
pub use tokens::TokenService;

use crate::auth::{CredentialError, MissingToken, PermissionError, SubjectId, TokenError};
use crate::storage::StorageError;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

/// Log a storage error on its way out of a service.
///
/// Database and serialization failures are logged at `error`; not-found and
/// conflict outcomes are expected and only logged at `debug`.
pub(crate) fn log_storage(
    subject: Option<SubjectId>,
    action: &'static str,
) -> impl FnOnce(StorageError) -> StorageError {
    move |e| {
        match &e {
            StorageError::Database(_) | StorageError::Serialization(_) => {
                error!(subject, action, error = %e, "Storage failure")
            }
            StorageError::NotFound(_) | StorageError::Conflict(_) => {
                debug!(subject, action, error = %e, "Storage rejected request")
            }
        }
        e
    }
}

/// Per-field input problems, collected rather than failing on the first one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<&'static str, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_default().push(message.into());
    }

    /// Record `message` against `field` unless `ok` holds
    pub fn check(&mut self, ok: bool, field: &'static str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(|m| m.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    MissingToken(#[from] MissingToken),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("permission '{0}' required")]
    PermissionDenied(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ValidationErrors> for AuthError {
    fn from(errors: ValidationErrors) -> Self {
        AuthError::Validation(errors)
    }
}

impl AuthError {
    /// Failures a transport reports as 401/403
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken(_)
                | AuthError::Token(_)
                | AuthError::Unauthorized(_)
                | AuthError::PermissionDenied(_)
                | AuthError::InvalidCredentials
        )
    }

    /// Failures of the stores or the hashing primitive; transient, never the
    /// caller's fault
    pub fn is_server_error(&self) -> bool {
        match self {
            AuthError::Storage(StorageError::Database(_))
            | AuthError::Storage(StorageError::Serialization(_)) => true,
            AuthError::Credential(CredentialError::HashingFailure(_)) => true,
            _ => false,
        }
    }

    /// Message safe to hand back to a client
    pub fn public_message(&self) -> String {
        match self {
            AuthError::MissingToken(_) => "missing authorization token".to_string(),
            AuthError::Token(e) if e.is_expired() => "token expired".to_string(),
            AuthError::Token(_) => "invalid or missing authentication token".to_string(),
            AuthError::Unauthorized(reason) => (*reason).to_string(),
            AuthError::PermissionDenied(_) => {
                "your account doesn't have the necessary permissions".to_string()
            }
            AuthError::InvalidCredentials => "invalid email or password".to_string(),
            AuthError::Validation(errors) => errors.to_string(),
            AuthError::Permission(e) => e.to_string(),
            AuthError::Credential(CredentialError::TooShort { .. }) => self.to_string(),
            AuthError::Storage(StorageError::NotFound(_)) => {
                "the requested resource could not be found".to_string()
            }
            AuthError::Storage(StorageError::Conflict(_)) => {
                "the record was modified or already exists".to_string()
            }
            _ => "internal server error".to_string(),
        }
    }
}
