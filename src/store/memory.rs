use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{evict_oldest, CredentialStore};
use crate::error::StoreError;
use crate::user::{User, UserChanges};

/// Process-local store, used by the test suite and for local runs
///
/// Every mutation happens under a single write lock, which makes rotation
/// atomic with respect to concurrent refreshes.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_refresh_token(&self, token_digest: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.refresh_tokens.iter().any(|t| t == token_digest))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let mut all: Vec<User> = self.users.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::DuplicateEmail);
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            changes.apply(user);
            user.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.users.write().await.remove(&id).is_some())
    }

    async fn add_refresh_token(
        &self,
        id: Uuid,
        token_digest: &str,
        max_tokens: Option<usize>,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                user.refresh_tokens.push(token_digest.to_string());
                evict_oldest(&mut user.refresh_tokens, max_tokens);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        old_digest: &str,
        new_digest: &str,
        max_tokens: Option<usize>,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        let Some(pos) = user.refresh_tokens.iter().position(|t| t == old_digest) else {
            return Ok(false);
        };
        user.refresh_tokens.remove(pos);
        user.refresh_tokens.push(new_digest.to_string());
        evict_oldest(&mut user.refresh_tokens, max_tokens);
        Ok(true)
    }

    async fn remove_refresh_token(&self, id: Uuid, token_digest: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&id) {
            user.refresh_tokens.retain(|t| t != token_digest);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Role;

    fn user(email: &str) -> User {
        User::new(
            Uuid::new_v4(),
            "Test User".to_string(),
            email.to_string(),
            "hash".to_string(),
        )
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email_ignoring_case() {
        let store = InMemoryCredentialStore::new();
        store.create(&user("alice@x.com")).await.unwrap();

        let result = store.create(&user("ALICE@x.com")).await;
        assert!(matches!(result, Err(StoreError::DuplicateEmail)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotation_consumes_old_digest_once() {
        let store = InMemoryCredentialStore::new();
        let alice = user("alice@x.com");
        store.create(&alice).await.unwrap();
        store.add_refresh_token(alice.id, "old", None).await.unwrap();

        assert!(store.rotate_refresh_token(alice.id, "old", "new", None).await.unwrap());
        assert!(!store.rotate_refresh_token(alice.id, "old", "newer", None).await.unwrap());

        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens, vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn find_by_refresh_token_scans_all_users() {
        let store = InMemoryCredentialStore::new();
        let alice = user("alice@x.com");
        let bob = user("bob@x.com");
        store.create(&alice).await.unwrap();
        store.create(&bob).await.unwrap();
        store.add_refresh_token(bob.id, "bob-token", None).await.unwrap();

        let owner = store.find_by_refresh_token("bob-token").await.unwrap().unwrap();
        assert_eq!(owner.id, bob.id);
        assert!(store.find_by_refresh_token("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_refresh_token_respects_cap() {
        let store = InMemoryCredentialStore::new();
        let alice = user("alice@x.com");
        store.create(&alice).await.unwrap();
        for digest in ["a", "b", "c"] {
            store.add_refresh_token(alice.id, digest, Some(2)).await.unwrap();
        }

        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryCredentialStore::new();
        let alice = user("alice@x.com");
        store.create(&alice).await.unwrap();
        store.add_refresh_token(alice.id, "a", None).await.unwrap();

        store.remove_refresh_token(alice.id, "a").await.unwrap();
        store.remove_refresh_token(alice.id, "a").await.unwrap();
        store.remove_refresh_token(Uuid::new_v4(), "a").await.unwrap();

        let stored = store.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(stored.refresh_tokens.is_empty());
    }

    #[tokio::test]
    async fn update_keeps_token_set() {
        let store = InMemoryCredentialStore::new();
        let alice = user("alice@x.com");
        store.create(&alice).await.unwrap();
        store.add_refresh_token(alice.id, "a", None).await.unwrap();

        let updated = store
            .update(
                alice.id,
                UserChanges {
                    role: Some(Role::Admin),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.refresh_tokens, vec!["a".to_string()]);
        assert!(store.update(Uuid::new_v4(), UserChanges::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_missing_users() {
        let store = InMemoryCredentialStore::new();
        let alice = user("alice@x.com");
        store.create(&alice).await.unwrap();

        assert!(store.delete(alice.id).await.unwrap());
        assert!(!store.delete(alice.id).await.unwrap());
    }
}
