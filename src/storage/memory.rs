//! In-memory storage backend

use crate::auth::{Permission, PermissionSet, SubjectId, TokenScope};
use crate::storage::{
    async_trait, IssuedToken, NewUser, PermissionStore, StorageError, TokenHash, TokenStore,
    User, UserDirectory,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Process-local store implementing every storage trait
#[derive(Default)]
pub struct MemoryStore {
    tokens: DashMap<TokenHash, IssuedToken>,
    grants: DashMap<SubjectId, PermissionSet>,
    users: RwLock<Users>,
}

#[derive(Default)]
struct Users {
    by_id: HashMap<SubjectId, User>,
    last_id: SubjectId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(&self, token: IssuedToken) -> Result<IssuedToken, StorageError> {
        self.tokens
            .entry(token.hash.clone())
            .or_insert_with(|| token.clone());

        debug!(
            subject = token.subject,
            scope = %token.scope,
            hash = token.hash.prefix(),
            "Stored token"
        );
        Ok(token)
    }

    async fn delete_by_hash(&self, hash: &TokenHash) -> Result<(), StorageError> {
        self.tokens.remove(hash);
        Ok(())
    }

    async fn list_by_owner_and_scope(
        &self,
        subject: SubjectId,
        scope: TokenScope,
    ) -> Result<Vec<IssuedToken>, StorageError> {
        let mut tokens: Vec<IssuedToken> = self
            .tokens
            .iter()
            .filter(|entry| entry.subject == subject && entry.scope == scope)
            .map(|entry| entry.value().clone())
            .collect();

        tokens.sort_by_key(|t| t.expires_at);
        Ok(tokens)
    }

    async fn delete_all_by_owner_and_scope(
        &self,
        subject: SubjectId,
        scope: TokenScope,
    ) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        self.tokens.retain(|_, t| {
            let doomed = t.subject == subject && t.scope == scope;
            if doomed {
                removed += 1;
            }
            !doomed
        });

        debug!(subject, scope = %scope, removed, "Deleted tokens");
        Ok(removed)
    }

    async fn consume(
        &self,
        subject: SubjectId,
        scope: TokenScope,
        hash: &TokenHash,
    ) -> Result<bool, StorageError> {
        let consumed = self
            .tokens
            .remove_if(hash, |_, t| t.subject == subject && t.scope == scope)
            .is_some();

        Ok(consumed)
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn create_permission(&self, permission: &Permission) -> Result<(), StorageError> {
        // Grants carry the name itself, so there is no catalog to maintain
        debug!(permission = %permission, "Permission name accepted");
        Ok(())
    }

    async fn grant(&self, subject: SubjectId, permission: &Permission) -> Result<(), StorageError> {
        self.create_permission(permission).await?;
        self.grants
            .entry(subject)
            .or_default()
            .add(permission.clone());
        Ok(())
    }

    async fn revoke(
        &self,
        subject: SubjectId,
        permission: &Permission,
    ) -> Result<(), StorageError> {
        if let Some(mut set) = self.grants.get_mut(&subject) {
            set.remove(permission);
        }
        Ok(())
    }

    async fn load_for_subject(&self, subject: SubjectId) -> Result<PermissionSet, StorageError> {
        Ok(self
            .grants
            .get(&subject)
            .map(|set| set.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StorageError> {
        let mut users = self.users.write();

        if users.by_id.values().any(|u| u.email == user.email) {
            return Err(StorageError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }

        users.last_id += 1;
        let user = User {
            id: users.last_id,
            created_at: Utc::now(),
            name: user.name,
            email: user.email,
            credential: user.credential,
            activated: false,
            version: 1,
        };
        users.by_id.insert(user.id, user.clone());

        Ok(user)
    }

    async fn get_by_id(&self, id: SubjectId) -> Result<User, StorageError> {
        self.users
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StorageError> {
        self.users
            .read()
            .by_id
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("user with email {}", email)))
    }

    async fn update_activation_status(
        &self,
        id: SubjectId,
        activated: bool,
    ) -> Result<(), StorageError> {
        let mut users = self.users.write();
        let user = users
            .by_id
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;

        user.activated = activated;
        user.version += 1;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<User, StorageError> {
        let mut users = self.users.write();

        if users
            .by_id
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StorageError::Conflict(format!(
                "email already registered: {}",
                user.email
            )));
        }

        let stored = users
            .by_id
            .get_mut(&user.id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", user.id)))?;

        if stored.version != user.version {
            return Err(StorageError::Conflict(format!(
                "user {} was modified concurrently",
                user.id
            )));
        }

        stored.name = user.name.clone();
        stored.email = user.email.clone();
        stored.credential = user.credential.clone();
        stored.version += 1;

        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use chrono::Duration;

    fn token(value: &str, subject: SubjectId, scope: TokenScope) -> IssuedToken {
        IssuedToken {
            hash: TokenHash::of(value),
            subject,
            expires_at: Utc::now() + Duration::hours(1),
            scope,
        }
    }

    #[tokio::test]
    async fn test_tokens_partitioned_by_scope() {
        let store = MemoryStore::new();
        store.insert(token("a", 1, TokenScope::UserAccess)).await.unwrap();
        store.insert(token("b", 1, TokenScope::ActivateEmail)).await.unwrap();
        store.insert(token("c", 2, TokenScope::UserAccess)).await.unwrap();

        let access = store.list_by_owner_and_scope(1, TokenScope::UserAccess).await.unwrap();
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].hash, TokenHash::of("a"));

        let removed = store
            .delete_all_by_owner_and_scope(1, TokenScope::UserAccess)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            store.list_by_owner_and_scope(1, TokenScope::ActivateEmail).await.unwrap().len(),
            1
        );
        assert_eq!(
            store.list_by_owner_and_scope(2, TokenScope::UserAccess).await.unwrap().len(),
            1
        );
        assert_eq!(
            store.delete_all_by_owner_and_scope(1, TokenScope::UserAccess).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let store = MemoryStore::new();
        store.insert(token("a", 1, TokenScope::UserAccess)).await.unwrap();
        store.insert(token("a", 1, TokenScope::UserAccess)).await.unwrap();

        let stored = store.list_by_owner_and_scope(1, TokenScope::UserAccess).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_hash_idempotent() {
        let store = MemoryStore::new();
        store.insert(token("a", 1, TokenScope::UserAccess)).await.unwrap();

        store.delete_by_hash(&TokenHash::of("a")).await.unwrap();
        store.delete_by_hash(&TokenHash::of("a")).await.unwrap();
        store.delete_by_hash(&TokenHash::of("never-stored")).await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_requires_owner_and_scope() {
        let store = MemoryStore::new();
        store.insert(token("a", 1, TokenScope::ActivateEmail)).await.unwrap();
        let hash = TokenHash::of("a");

        assert!(!store.consume(2, TokenScope::ActivateEmail, &hash).await.unwrap());
        assert!(!store.consume(1, TokenScope::UserAccess, &hash).await.unwrap());
        assert!(store.consume(1, TokenScope::ActivateEmail, &hash).await.unwrap());
        assert!(!store.consume(1, TokenScope::ActivateEmail, &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_permissions() {
        let store = MemoryStore::new();
        let write = Permission::parse("permissions:write").unwrap();

        store.grant(7, &write).await.unwrap();
        store.grant(7, &write).await.unwrap();
        assert_eq!(store.load_for_subject(7).await.unwrap().len(), 1);
        assert!(store.load_for_subject(8).await.unwrap().is_empty());
        store.create_permission(&write).await.unwrap();
        assert_eq!(store.load_for_subject(7).await.unwrap().len(), 1);

        store.revoke(7, &write).await.unwrap();
        store.revoke(7, &write).await.unwrap();
        store.revoke(99, &write).await.unwrap();
        assert!(store.load_for_subject(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users() {
        let store = MemoryStore::new();
        let new_user = NewUser {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            credential: Credential::from_hash("$argon2id$stub"),
        };

        let user = store.insert_user(new_user.clone()).await.unwrap();
        assert_eq!(user.id, 1);
        assert!(!user.activated);
        assert!(matches!(store.insert_user(new_user).await, Err(StorageError::Conflict(_))));

        store.update_activation_status(user.id, true).await.unwrap();
        let loaded = store.get_by_email("ada@example.com").await.unwrap();
        assert!(loaded.activated);

        // Stale version
        assert!(matches!(store.update(&user).await, Err(StorageError::Conflict(_))));

        let mut renamed = loaded.clone();
        renamed.name = "Ada King".to_string();
        let updated = store.update(&renamed).await.unwrap();
        assert_eq!(updated.version, loaded.version + 1);
        assert_eq!(store.get_by_id(user.id).await.unwrap().name, "Ada King");

        assert!(matches!(store.get_by_id(42).await, Err(StorageError::NotFound(_))));
    }
}
