/// Refresh-token sessions
///
/// Each user owns a set of refresh-token digests, one per live session.
/// Tokens are rotated on use: a successful refresh consumes the presented
/// token and registers its replacement in one atomic store operation, so a
/// stolen token can be exchanged at most once.
///
/// A refresh succeeds only if the token both verifies cryptographically and
/// is still present in its owner's set. Removing a digest is therefore
/// enough to end a session before the token's stated expiry.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::jwt::{generate_token_pair, validate_refresh_token, TokenPair};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::store::CredentialStore;
use crate::user::User;

/// Hash a refresh token using SHA-256
///
/// Stores only ever see digests, never the token itself.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Issue a token pair for `user` and register its refresh token alongside
/// the user's existing sessions
///
/// # Errors
/// `InvalidCredentials` if the user vanished between lookup and
/// registration; store errors otherwise
pub async fn issue_session(
    store: &dyn CredentialStore,
    user: &User,
    jwt: &JwtSettings,
    max_tokens: Option<usize>,
) -> Result<TokenPair, AppError> {
    let pair = generate_token_pair(user.id, user.role, jwt)?;

    let registered = store
        .add_refresh_token(user.id, &hash_token(&pair.refresh_token), max_tokens)
        .await?;
    if !registered {
        return Err(AuthError::InvalidCredentials.into());
    }

    Ok(pair)
}

/// Exchange a refresh token for a new pair, consuming the presented token
///
/// # Errors
/// `InvalidRefreshToken` when the token fails verification, is not held by
/// any user, belongs to someone other than its subject, or was consumed by a
/// concurrent refresh
pub async fn rotate_session(
    store: &dyn CredentialStore,
    presented: &str,
    jwt: &JwtSettings,
    max_tokens: Option<usize>,
) -> Result<(User, TokenPair), AppError> {
    let claims = validate_refresh_token(presented, jwt).map_err(|e| {
        tracing::warn!(error = %e, "Refresh token failed verification");
        AuthError::InvalidRefreshToken
    })?;
    let subject = claims
        .user_id()
        .map_err(|_| AuthError::InvalidRefreshToken)?;

    let old_digest = hash_token(presented);
    let user = store
        .find_by_refresh_token(&old_digest)
        .await?
        .ok_or_else(|| {
            tracing::warn!(user_id = %subject, "Refresh token not held by any user");
            AuthError::InvalidRefreshToken
        })?;

    if user.id != subject {
        tracing::warn!(
            user_id = %user.id,
            subject = %subject,
            "Refresh token subject does not match its holder"
        );
        return Err(AuthError::InvalidRefreshToken.into());
    }

    // Role comes from the stored record, not the presented token
    let pair = generate_token_pair(user.id, user.role, jwt)?;
    let rotated = store
        .rotate_refresh_token(
            user.id,
            &old_digest,
            &hash_token(&pair.refresh_token),
            max_tokens,
        )
        .await?;
    if !rotated {
        tracing::warn!(user_id = %user.id, "Refresh token consumed by a concurrent refresh");
        return Err(AuthError::InvalidRefreshToken.into());
    }

    Ok((user, pair))
}

/// End the session identified by `presented` for `user_id`
///
/// Unknown or already-consumed tokens are ignored.
pub async fn end_session(
    store: &dyn CredentialStore,
    user_id: Uuid,
    presented: &str,
) -> Result<(), AppError> {
    store
        .remove_refresh_token(user_id, &hash_token(presented))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{Claims, TokenType};
    use crate::store::InMemoryCredentialStore;
    use crate::user::Role;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::Arc;

    fn jwt() -> JwtSettings {
        JwtSettings {
            access_secret: "session-test-access-secret".to_string(),
            refresh_secret: "session-test-refresh-secret".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    async fn store_with_user() -> (InMemoryCredentialStore, User) {
        let store = InMemoryCredentialStore::new();
        let user = User::new(
            Uuid::new_v4(),
            "Alice".to_string(),
            "alice@x.com".to_string(),
            "hash".to_string(),
        );
        store.create(&user).await.unwrap();
        (store, user)
    }

    fn is_invalid_refresh(err: &AppError) -> bool {
        matches!(err, AppError::Auth(AuthError::InvalidRefreshToken))
    }

    #[test]
    fn test_token_hashing() {
        let hash1 = hash_token("token");
        let hash2 = hash_token("token");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash_token("other"));
        assert_eq!(hash1.len(), 64);
    }

    #[tokio::test]
    async fn sessions_accumulate_per_login() {
        let (store, user) = store_with_user().await;
        let config = jwt();

        let first = issue_session(&store, &user, &config, None).await.unwrap();
        let second = issue_session(&store, &user, &config, None).await.unwrap();

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 2);
        assert!(stored.refresh_tokens.contains(&hash_token(&first.refresh_token)));
        assert!(stored.refresh_tokens.contains(&hash_token(&second.refresh_token)));
    }

    #[tokio::test]
    async fn issue_for_missing_user_fails() {
        let store = InMemoryCredentialStore::new();
        let ghost = User::new(Uuid::new_v4(), "G".into(), "g@x.com".into(), "h".into());

        let err = issue_session(&store, &ghost, &jwt(), None).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn rotation_replaces_token_and_rejects_replay() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let original = issue_session(&store, &user, &config, None).await.unwrap();

        let (_, rotated) = rotate_session(&store, &original.refresh_token, &config, None)
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, original.refresh_token);

        let replay = rotate_session(&store, &original.refresh_token, &config, None)
            .await
            .unwrap_err();
        assert!(is_invalid_refresh(&replay));

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens, vec![hash_token(&rotated.refresh_token)]);
    }

    #[tokio::test]
    async fn rotation_leaves_other_sessions_alone() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let laptop = issue_session(&store, &user, &config, None).await.unwrap();
        let phone = issue_session(&store, &user, &config, None).await.unwrap();

        rotate_session(&store, &laptop.refresh_token, &config, None)
            .await
            .unwrap();

        assert!(rotate_session(&store, &phone.refresh_token, &config, None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn rotation_picks_up_current_role() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let pair = issue_session(&store, &user, &config, None).await.unwrap();
        store
            .update(
                user.id,
                crate::user::UserChanges {
                    role: Some(Role::Admin),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (_, rotated) = rotate_session(&store, &pair.refresh_token, &config, None)
            .await
            .unwrap();
        let claims = crate::auth::validate_access_token(&rotated.access_token, &config).unwrap();
        assert_eq!(claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn forged_token_is_rejected_before_lookup() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let claims = Claims::new(user.id, Role::User, TokenType::Refresh, 600, "test".into());
        let forged = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"not-the-refresh-secret"),
        )
        .unwrap();
        // Even if its digest were registered, the signature check fails first
        store
            .add_refresh_token(user.id, &hash_token(&forged), None)
            .await
            .unwrap();

        let err = rotate_session(&store, &forged, &config, None).await.unwrap_err();
        assert!(is_invalid_refresh(&err));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_even_if_stored() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let claims = Claims::new(user.id, Role::User, TokenType::Refresh, -60, "test".into());
        let expired = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.refresh_secret.as_bytes()),
        )
        .unwrap();
        store
            .add_refresh_token(user.id, &hash_token(&expired), None)
            .await
            .unwrap();

        let err = rotate_session(&store, &expired, &config, None).await.unwrap_err();
        assert!(is_invalid_refresh(&err));
    }

    #[tokio::test]
    async fn valid_but_unregistered_token_is_rejected() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let pair = generate_token_pair(user.id, user.role, &config).unwrap();

        let err = rotate_session(&store, &pair.refresh_token, &config, None)
            .await
            .unwrap_err();
        assert!(is_invalid_refresh(&err));
    }

    #[tokio::test]
    async fn token_held_by_someone_else_is_rejected() {
        let (store, alice) = store_with_user().await;
        let bob = User::new(Uuid::new_v4(), "Bob".into(), "bob@x.com".into(), "h".into());
        store.create(&bob).await.unwrap();
        let config = jwt();

        // A token minted for Alice but registered under Bob
        let pair = generate_token_pair(alice.id, alice.role, &config).unwrap();
        store
            .add_refresh_token(bob.id, &hash_token(&pair.refresh_token), None)
            .await
            .unwrap();

        let err = rotate_session(&store, &pair.refresh_token, &config, None)
            .await
            .unwrap_err();
        assert!(is_invalid_refresh(&err));
    }

    #[tokio::test]
    async fn logout_ends_session_and_is_idempotent() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let pair = issue_session(&store, &user, &config, None).await.unwrap();

        end_session(&store, user.id, &pair.refresh_token).await.unwrap();
        end_session(&store, user.id, &pair.refresh_token).await.unwrap();
        end_session(&store, user.id, "never-issued").await.unwrap();

        let err = rotate_session(&store, &pair.refresh_token, &config, None)
            .await
            .unwrap_err();
        assert!(is_invalid_refresh(&err));
    }

    #[tokio::test]
    async fn concurrent_rotations_yield_one_winner() {
        let (store, user) = store_with_user().await;
        let store = Arc::new(store);
        let config = jwt();
        let pair = issue_session(store.as_ref(), &user, &config, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let config = config.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move {
                rotate_session(store.as_ref(), &token, &config, None)
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 1);
    }

    #[tokio::test]
    async fn capped_sessions_evict_oldest() {
        let (store, user) = store_with_user().await;
        let config = jwt();
        let oldest = issue_session(&store, &user, &config, Some(2)).await.unwrap();
        issue_session(&store, &user, &config, Some(2)).await.unwrap();
        issue_session(&store, &user, &config, Some(2)).await.unwrap();

        let err = rotate_session(&store, &oldest.refresh_token, &config, Some(2))
            .await
            .unwrap_err();
        assert!(is_invalid_refresh(&err));
    }
}
