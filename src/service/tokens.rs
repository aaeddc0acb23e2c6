//! Token issuance, validation, consumption and revocation

use crate::auth::tokens;
use crate::auth::{Claims, SignedToken, SubjectId, TokenError, TokenScope};
use crate::service::{log_storage, AuthError};
use crate::storage::{IssuedToken, StorageError, TokenHash, TokenStore};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Orchestrates the codec and a [`TokenStore`]
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Sign a token. Nothing is persisted; see [`TokenService::store`].
    pub fn issue(
        &self,
        subject: SubjectId,
        scope: TokenScope,
        ttl: Duration,
        secret: &[u8],
    ) -> Result<SignedToken, TokenError> {
        let token = tokens::encode(subject, scope, ttl, secret)?;
        debug!(subject, scope = %scope, exp = token.claims().exp, "Issued token");
        Ok(token)
    }

    /// Persist an issued token so it can later be consumed or checked for liveness
    pub async fn store(&self, token: &SignedToken) -> Result<IssuedToken, StorageError> {
        let claims = token.claims();
        let row = IssuedToken {
            hash: TokenHash::of(token.as_str()),
            subject: claims.sub,
            expires_at: token.expires_at(),
            scope: claims.scope,
        };

        self.store
            .insert(row)
            .await
            .map_err(log_storage(Some(claims.sub), "store token"))
    }

    /// Put back the row for a token consumed by a step that later failed
    pub(crate) async fn reinstate(&self, claims: &Claims, token: &str) {
        let Some(expires_at) = claims.expires_at() else {
            return;
        };
        let row = IssuedToken {
            hash: TokenHash::of(token),
            subject: claims.sub,
            expires_at,
            scope: claims.scope,
        };

        match self.store.insert(row).await {
            Ok(_) => debug!(subject = claims.sub, scope = %claims.scope, "Reinstated token"),
            Err(e) => error!(
                subject = claims.sub,
                scope = %claims.scope,
                error = %e,
                "Failed to reinstate consumed token"
            ),
        }
    }

    /// Verify signature, claims and expiry.
    ///
    /// A tampered or malformed token has any stored row for the same string
    /// deleted before the error is returned. Expired tokens are left alone.
    pub async fn validate(&self, token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
        match tokens::decode(token, secret) {
            Ok(claims) => Ok(claims),
            Err(e) => {
                if e.is_tampered() {
                    warn!(error = %e, "Rejected tampered token");
                    self.discard(token).await;
                } else {
                    debug!(error = %e, "Rejected token");
                }
                Err(e)
            }
        }
    }

    /// [`TokenService::validate`] plus a scope check
    pub async fn validate_for_scope(
        &self,
        token: &str,
        scope: TokenScope,
        secret: &[u8],
    ) -> Result<Claims, TokenError> {
        let claims = self.validate(token, secret).await?;

        if claims.scope != scope {
            warn!(
                subject = claims.sub,
                expected = %scope,
                actual = %claims.scope,
                "Token presented for wrong scope"
            );
            return Err(TokenError::ScopeMismatch {
                expected: scope,
                actual: claims.scope,
            });
        }

        Ok(claims)
    }

    pub async fn is_valid(&self, token: &str, secret: &[u8]) -> bool {
        self.validate(token, secret).await.is_ok()
    }

    /// Subject of a token. Fails on any token `validate` would reject.
    pub fn extract_subject(&self, token: &str, secret: &[u8]) -> Result<SubjectId, TokenError> {
        tokens::decode(token, secret).map(|claims| claims.sub)
    }

    /// Delete the stored row for `token` if it belongs to `subject` under
    /// `scope`. At most one caller presenting the same token sees `true`.
    pub async fn consume_if_member(
        &self,
        subject: SubjectId,
        scope: TokenScope,
        token: &str,
    ) -> Result<bool, StorageError> {
        let hash = TokenHash::of(token);
        let consumed = self
            .store
            .consume(subject, scope, &hash)
            .await
            .map_err(log_storage(Some(subject), "consume token"))?;

        if consumed {
            debug!(subject, scope = %scope, hash = hash.prefix(), "Consumed token");
        }
        Ok(consumed)
    }

    /// Whether `token` is still stored, unexpired, for the subject and scope
    /// in `claims`
    pub async fn is_live(&self, claims: &Claims, token: &str) -> Result<bool, StorageError> {
        let hash = TokenHash::of(token);
        let stored = self.list(claims.sub, claims.scope).await?;

        Ok(stored.iter().any(|row| row.hash == hash && !row.is_expired()))
    }

    /// Stored tokens of one scope for a subject
    pub async fn list(
        &self,
        subject: SubjectId,
        scope: TokenScope,
    ) -> Result<Vec<IssuedToken>, StorageError> {
        self.store
            .list_by_owner_and_scope(subject, scope)
            .await
            .map_err(log_storage(Some(subject), "list tokens"))
    }

    pub async fn revoke(&self, token: &str) -> Result<(), StorageError> {
        self.store
            .delete_by_hash(&TokenHash::of(token))
            .await
            .map_err(log_storage(None, "revoke token"))
    }

    /// Delete every stored token of `scope` for `subject`
    pub async fn revoke_all(
        &self,
        subject: SubjectId,
        scope: TokenScope,
    ) -> Result<u64, StorageError> {
        let removed = self
            .store
            .delete_all_by_owner_and_scope(subject, scope)
            .await
            .map_err(log_storage(Some(subject), "revoke tokens"))?;

        if removed > 0 {
            info!(subject, scope = %scope, removed, "Revoked tokens");
        }
        Ok(removed)
    }

    /// Revoke all tokens of `scope` for `subject`, then issue and store a new one
    pub async fn rotate(
        &self,
        subject: SubjectId,
        scope: TokenScope,
        ttl: Duration,
        secret: &[u8],
    ) -> Result<SignedToken, AuthError> {
        self.revoke_all(subject, scope).await?;
        let token = self.issue(subject, scope, ttl, secret)?;
        self.store(&token).await?;
        Ok(token)
    }

    /// Best-effort removal of a rejected token's row
    pub(crate) async fn discard(&self, token: &str) {
        let hash = TokenHash::of(token);
        if let Err(e) = self.store.delete_by_hash(&hash).await {
            warn!(error = %e, hash = hash.prefix(), "Failed to discard rejected token");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{async_trait, MemoryStore};

    const SECRET: &[u8] = b"unit-test-secret";

    fn service() -> (TokenService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TokenService::new(store.clone()), store)
    }

    /// Token store whose deletes always fail
    struct BrokenDeletes(MemoryStore);

    #[async_trait]
    impl TokenStore for BrokenDeletes {
        async fn insert(&self, token: IssuedToken) -> Result<IssuedToken, StorageError> {
            self.0.insert(token).await
        }

        async fn delete_by_hash(&self, _hash: &TokenHash) -> Result<(), StorageError> {
            Err(StorageError::Database("disk full".into()))
        }

        async fn list_by_owner_and_scope(
            &self,
            subject: SubjectId,
            scope: TokenScope,
        ) -> Result<Vec<IssuedToken>, StorageError> {
            self.0.list_by_owner_and_scope(subject, scope).await
        }

        async fn delete_all_by_owner_and_scope(
            &self,
            subject: SubjectId,
            scope: TokenScope,
        ) -> Result<u64, StorageError> {
            self.0.delete_all_by_owner_and_scope(subject, scope).await
        }

        async fn consume(
            &self,
            subject: SubjectId,
            scope: TokenScope,
            hash: &TokenHash,
        ) -> Result<bool, StorageError> {
            self.0.consume(subject, scope, hash).await
        }
    }

    #[tokio::test]
    async fn test_issue_does_not_persist() {
        let (tokens, store) = service();
        let token = tokens
            .issue(7, TokenScope::UserAccess, Duration::hours(1), SECRET)
            .unwrap();

        assert!(store
            .list_by_owner_and_scope(7, TokenScope::UserAccess)
            .await
            .unwrap()
            .is_empty());

        let row = tokens.store(&token).await.unwrap();
        assert_eq!(row.subject, 7);
        assert_eq!(row.expires_at.timestamp(), token.claims().exp);
        assert!(tokens.is_live(token.claims(), token.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_token_is_discarded() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(7, TokenScope::UserAccess, Duration::hours(1), SECRET)
            .unwrap();

        // Row stored under a forged string, e.g. left behind by a buggy writer
        let forged = format!("{}x", token.as_str());
        let mut row = tokens.store(&token).await.unwrap();
        row.hash = TokenHash::of(&forged);
        tokens.store.insert(row).await.unwrap();
        assert_eq!(tokens.list(7, TokenScope::UserAccess).await.unwrap().len(), 2);

        let err = tokens.validate(&forged, SECRET).await.unwrap_err();
        assert!(err.is_tampered());
        assert_eq!(tokens.list(7, TokenScope::UserAccess).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_kept() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(7, TokenScope::UserAccess, Duration::seconds(-1), SECRET)
            .unwrap();
        tokens.store(&token).await.unwrap();

        let err = tokens.validate(token.as_str(), SECRET).await.unwrap_err();
        assert!(err.is_expired());
        assert_eq!(tokens.list(7, TokenScope::UserAccess).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_error() {
        let tokens = TokenService::new(Arc::new(BrokenDeletes(MemoryStore::new())));

        let err = tokens.validate("not.a.token", SECRET).await.unwrap_err();
        assert!(matches!(err, TokenError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_validate_for_scope() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(7, TokenScope::ActivateEmail, Duration::hours(1), SECRET)
            .unwrap();

        let claims = tokens
            .validate_for_scope(token.as_str(), TokenScope::ActivateEmail, SECRET)
            .await
            .unwrap();
        assert_eq!(claims.sub, 7);

        let err = tokens
            .validate_for_scope(token.as_str(), TokenScope::UserAccess, SECRET)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TokenError::ScopeMismatch {
                expected: TokenScope::UserAccess,
                actual: TokenScope::ActivateEmail,
            }
        );
    }

    #[tokio::test]
    async fn test_extract_subject() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(99, TokenScope::UserAccess, Duration::hours(1), SECRET)
            .unwrap();

        assert_eq!(tokens.extract_subject(token.as_str(), SECRET).unwrap(), 99);
        assert!(tokens.extract_subject(token.as_str(), b"other").is_err());
        assert!(tokens.extract_subject("garbage", SECRET).is_err());
    }

    #[tokio::test]
    async fn test_consume_requires_exact_token() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(7, TokenScope::ActivateEmail, Duration::hours(1), SECRET)
            .unwrap();
        tokens.store(&token).await.unwrap();

        // Same subject and scope, but a token that was never stored
        let other = tokens
            .issue(7, TokenScope::ActivateEmail, Duration::hours(2), SECRET)
            .unwrap();
        assert!(!tokens
            .consume_if_member(7, TokenScope::ActivateEmail, other.as_str())
            .await
            .unwrap());

        assert!(!tokens
            .consume_if_member(8, TokenScope::ActivateEmail, token.as_str())
            .await
            .unwrap());
        assert!(tokens
            .consume_if_member(7, TokenScope::ActivateEmail, token.as_str())
            .await
            .unwrap());
        assert!(!tokens
            .consume_if_member(7, TokenScope::ActivateEmail, token.as_str())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_rotate_supersedes() {
        let (tokens, _store) = service();
        let first = tokens
            .rotate(7, TokenScope::UserAccess, Duration::hours(1), SECRET)
            .await
            .unwrap();
        let second = tokens
            .rotate(7, TokenScope::UserAccess, Duration::hours(2), SECRET)
            .await
            .unwrap();

        let stored = tokens.list(7, TokenScope::UserAccess).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].hash, TokenHash::of(second.as_str()));
        assert!(!tokens.is_live(first.claims(), first.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_leaves_other_scope() {
        let (tokens, _store) = service();
        tokens
            .rotate(7, TokenScope::UserAccess, Duration::hours(1), SECRET)
            .await
            .unwrap();
        tokens
            .rotate(7, TokenScope::ActivateEmail, Duration::hours(1), SECRET)
            .await
            .unwrap();

        assert_eq!(tokens.revoke_all(7, TokenScope::UserAccess).await.unwrap(), 1);
        assert_eq!(tokens.revoke_all(7, TokenScope::UserAccess).await.unwrap(), 0);
        assert_eq!(tokens.list(7, TokenScope::ActivateEmail).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_row_is_not_live() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(7, TokenScope::UserAccess, Duration::seconds(-5), SECRET)
            .unwrap();
        tokens.store(&token).await.unwrap();

        assert!(!tokens.is_live(token.claims(), token.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reinstate_consumed_token() {
        let (tokens, _store) = service();
        let token = tokens
            .issue(7, TokenScope::ActivateEmail, Duration::hours(1), SECRET)
            .unwrap();
        tokens.store(&token).await.unwrap();

        assert!(tokens
            .consume_if_member(7, TokenScope::ActivateEmail, token.as_str())
            .await
            .unwrap());
        tokens.reinstate(token.claims(), token.as_str()).await;

        let stored = tokens.list(7, TokenScope::ActivateEmail).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].expires_at, token.expires_at());
        assert!(tokens
            .consume_if_member(7, TokenScope::ActivateEmail, token.as_str())
            .await
            .unwrap());
    }
}
