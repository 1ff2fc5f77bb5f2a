/// Admin Routes
///
/// The caller's role is re-read from the store on every request instead of
/// trusting the role claim of the access token, so a demotion takes effect
/// before the caller's token expires.

use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::middleware::Identity;
use crate::routes::MessageResponse;
use crate::store::CredentialStore;
use crate::user::{User, UserSummary};

/// Load the caller and make sure they are currently an admin
///
/// # Errors
/// - `TokenInvalid` (401) when the caller's record no longer exists
/// - `Forbidden` (403) when the caller is not an admin
pub async fn require_admin(
    store: &dyn CredentialStore,
    identity: &Identity,
) -> Result<User, AppError> {
    let caller = store
        .find_by_id(identity.user_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    if !caller.is_admin() {
        tracing::warn!(user_id = %caller.id, role = %caller.role, "Admin access denied");
        return Err(AppError::Forbidden);
    }
    Ok(caller)
}

/// GET /admin/users
///
/// **Requires an admin access token.** Lists every user without password
/// hashes or refresh tokens.
pub async fn list_users(
    identity: web::ReqData<Identity>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    require_admin(store.get_ref(), &identity).await?;

    let users: Vec<UserSummary> = store
        .list()
        .await?
        .iter()
        .map(UserSummary::listing)
        .collect();

    Ok(HttpResponse::Ok().json(users))
}

/// DELETE /admin/users/{id}
///
/// **Requires an admin access token.**
///
/// # Errors
/// - 403: caller is not an admin
/// - 404: no user with that id (including ids that are not UUIDs)
pub async fn delete_user(
    identity: web::ReqData<Identity>,
    path: web::Path<String>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let admin = require_admin(store.get_ref(), &identity).await?;

    let target = Uuid::parse_str(&path).map_err(|_| AppError::NotFound("User".to_string()))?;
    if !store.delete(target).await? {
        return Err(AppError::NotFound("User".to_string()));
    }

    tracing::info!(admin_id = %admin.id, user_id = %target, "User deleted by admin");

    Ok(HttpResponse::Ok().json(MessageResponse::new("User deleted")))
}
