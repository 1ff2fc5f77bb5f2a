/// Credential store
///
/// Persistence boundary for user records and their refresh-token sets.
/// Token-set mutations are expressed as dedicated operations so each backend
/// can perform them atomically instead of as a read-then-write pair.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::user::{User, UserChanges};

mod memory;
mod postgres;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Lookup by email; callers pass the normalised (lower-cased) address
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Find the user whose token set contains `token_digest`
    async fn find_by_refresh_token(&self, token_digest: &str) -> Result<Option<User>, StoreError>;

    async fn list(&self) -> Result<Vec<User>, StoreError>;

    /// Insert a new user. Fails with `StoreError::DuplicateEmail` when the
    /// email is taken, compared case-insensitively.
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    /// Apply profile/role changes; never touches the token set.
    /// Returns `None` when the user does not exist.
    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError>;

    /// Returns `false` when no user had that id
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Append a digest to the user's token set, evicting the oldest entries
    /// beyond `max_tokens`. Returns `false` when the user does not exist.
    async fn add_refresh_token(
        &self,
        id: Uuid,
        token_digest: &str,
        max_tokens: Option<usize>,
    ) -> Result<bool, StoreError>;

    /// Replace `old_digest` with `new_digest` only if `old_digest` is still in
    /// the user's set, as one atomic operation. Returns `false` when it was
    /// not present, so at most one caller can consume a given token.
    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        old_digest: &str,
        new_digest: &str,
        max_tokens: Option<usize>,
    ) -> Result<bool, StoreError>;

    /// Remove a digest from the user's set. Removing an absent digest is not
    /// an error.
    async fn remove_refresh_token(&self, id: Uuid, token_digest: &str) -> Result<(), StoreError>;
}

/// Drop the oldest entries so at most `max_tokens` remain
pub(crate) fn evict_oldest(tokens: &mut Vec<String>, max_tokens: Option<usize>) {
    if let Some(max) = max_tokens {
        if tokens.len() > max {
            let excess = tokens.len() - max;
            tokens.drain(..excess);
        }
    }
}
