//! Warden - scoped token lifecycle and permission authorization
//!
//! Issues signed tokens for two purposes (email activation and ongoing
//! access), tracks which tokens are outstanding, and decides whether the
//! holder of an access token may perform an operation guarded by a named
//! permission.

pub mod auth;
pub mod config;
pub mod service;
pub mod storage;

pub use auth::{
    Claims, Credential, Permission, PermissionSet, SignedToken, SubjectId, TokenError, TokenScope,
};
pub use config::AuthConfig;
pub use service::{AccountService, AuthError, AuthorizationGate, PermissionService, TokenService};
pub use storage::{MemoryStore, PostgresStore};
