//! Credentials, tokens and permissions
//!
//! Token scopes:
//! - `ActivateEmail`: single-use, consumed when the email address is confirmed
//! - `UserAccess`: session token, superseded on every login
//!
//! Permissions are named strings (`permissions:write`) bound to subjects.

mod bearer;
mod credentials;
mod permissions;
pub mod tokens;

pub use bearer::{extract_bearer, MissingToken, BEARER_PREFIX};
pub use credentials::{Credential, CredentialError, MIN_SECRET_LEN};
pub use permissions::{Permission, PermissionError, PermissionSet};
pub use tokens::{Claims, SignedToken, SubjectId, TokenError, TokenScope, UnknownScope};
