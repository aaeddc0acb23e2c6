//! Permission management and the authorization decision

use crate::auth::{extract_bearer, Permission, PermissionSet, SubjectId, TokenScope};
use crate::service::{log_storage, AuthError, TokenService};
use crate::storage::PermissionStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Grants and revokes named permissions
#[derive(Clone)]
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
}

impl PermissionService {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    /// Register a permission name without granting it to anyone
    pub async fn create(&self, name: &str) -> Result<Permission, AuthError> {
        let permission = Permission::parse(name)?;
        self.store
            .create_permission(&permission)
            .await
            .map_err(log_storage(None, "create permission"))?;
        debug!(permission = %permission, "Registered permission");
        Ok(permission)
    }

    pub async fn grant(&self, subject: SubjectId, name: &str) -> Result<Permission, AuthError> {
        let permission = Permission::parse(name)?;
        self.store
            .grant(subject, &permission)
            .await
            .map_err(log_storage(Some(subject), "grant permission"))?;
        info!(subject, permission = %permission, "Granted permission");
        Ok(permission)
    }

    pub async fn revoke(&self, subject: SubjectId, name: &str) -> Result<Permission, AuthError> {
        let permission = Permission::parse(name)?;
        self.store
            .revoke(subject, &permission)
            .await
            .map_err(log_storage(Some(subject), "revoke permission"))?;
        info!(subject, permission = %permission, "Revoked permission");
        Ok(permission)
    }

    pub async fn load(&self, subject: SubjectId) -> Result<PermissionSet, AuthError> {
        Ok(self
            .store
            .load_for_subject(subject)
            .await
            .map_err(log_storage(Some(subject), "load permissions"))?)
    }
}

/// Maps a bearer token to an allow/deny decision for one permission
#[derive(Clone)]
pub struct AuthorizationGate {
    tokens: TokenService,
    permissions: Arc<dyn PermissionStore>,
}

impl AuthorizationGate {
    pub fn new(tokens: TokenService, permissions: Arc<dyn PermissionStore>) -> Self {
        Self {
            tokens,
            permissions,
        }
    }

    /// Allow the subject of `token` if it holds `required`.
    ///
    /// The token must be a live `UserAccess` token. Token problems come back
    /// as unauthorized errors; a permission store failure is a `Storage`
    /// error and is never reported as a deny.
    pub async fn authorize(
        &self,
        token: &str,
        required: &str,
        secret: &[u8],
    ) -> Result<SubjectId, AuthError> {
        let claims = self
            .tokens
            .validate_for_scope(token, TokenScope::UserAccess, secret)
            .await?;
        let subject = self.tokens.extract_subject(token, secret)?;

        match self.tokens.is_live(&claims, token).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(subject, "Access token is not active");
                return Err(AuthError::Unauthorized("invalid or revoked token"));
            }
            Err(e) => return Err(e.into()),
        }

        let permissions = self
            .permissions
            .load_for_subject(subject)
            .await
            .map_err(log_storage(Some(subject), "load permissions"))?;

        if !permissions.allows(required) {
            info!(subject, permission = required, "Permission denied");
            return Err(AuthError::PermissionDenied(required.to_string()));
        }

        debug!(subject, permission = required, "Authorized");
        Ok(subject)
    }

    /// [`AuthorizationGate::authorize`] on a raw `Authorization` header value
    pub async fn authorize_header(
        &self,
        header: Option<&str>,
        required: &str,
        secret: &[u8],
    ) -> Result<SubjectId, AuthError> {
        let token = extract_bearer(header)?;
        self.authorize(token, required, secret).await
    }
}
