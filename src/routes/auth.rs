/// Authentication Routes
///
/// Registration, login, refresh-token rotation and logout.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{
    end_session, generate_token_pair, hash_password, hash_token, issue_session, rotate_session,
    verify_password, TokenPair,
};
use crate::configuration::{AuthSettings, JwtSettings};
use crate::error::{AppError, AuthError, ValidationError};
use crate::middleware::Identity;
use crate::routes::MessageResponse;
use crate::store::CredentialStore;
use crate::user::{User, UserSummary};
use crate::validators::{is_valid_email, is_valid_name, is_valid_password};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of `/auth/refresh` and `/auth/logout`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair, plus the user summary on register/login
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}

impl AuthResponse {
    fn new(pair: TokenPair, user: Option<&User>) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer",
            expires_in: pair.expires_in,
            user: user.map(UserSummary::brief),
        }
    }
}

fn require_refresh_token(form: &RefreshRequest) -> Result<&str, AppError> {
    let token = form.refresh_token.trim();
    if token.is_empty() {
        return Err(ValidationError::EmptyField("refreshToken".to_string()).into());
    }
    Ok(token)
}

/// POST /auth/register
///
/// Creates the user with role `user` and opens its first session.
///
/// # Errors
/// - 400: invalid name, email or password
/// - 409: email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    store: web::Data<dyn CredentialStore>,
    jwt_config: web::Data<JwtSettings>,
    auth_config: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let name = is_valid_name(&form.name)?;
    let email = is_valid_email(&form.email)?;
    is_valid_password(&form.password)?;

    if store.find_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password = form.password.clone();
    let cost = auth_config.password_hash_cost;
    let password_hash = web::block(move || hash_password(&password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))??;

    // The first session is stored together with the user in one write
    let mut user = User::new(Uuid::new_v4(), name, email, password_hash);
    let pair = generate_token_pair(user.id, user.role, jwt_config.get_ref())?;
    user.refresh_tokens.push(hash_token(&pair.refresh_token));
    store.create(&user).await?;

    tracing::info!(user_id = %user.id, "User registered successfully");

    Ok(HttpResponse::Created().json(AuthResponse::new(pair, Some(&user))))
}

/// POST /auth/login
///
/// Opens an additional session; existing sessions stay valid.
///
/// # Errors
/// - 400: malformed email
/// - 401: unknown email or wrong password (indistinguishable)
pub async fn login(
    form: web::Json<LoginRequest>,
    store: web::Data<dyn CredentialStore>,
    jwt_config: web::Data<JwtSettings>,
    auth_config: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;

    let user = store
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let password = form.password.clone();
    let password_hash = user.password_hash.clone();
    let password_valid = web::block(move || verify_password(&password, &password_hash))
        .await
        .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))??;
    if !password_valid {
        return Err(AuthError::InvalidCredentials.into());
    }

    let pair = issue_session(
        store.get_ref(),
        &user,
        jwt_config.get_ref(),
        auth_config.max_refresh_tokens_per_user,
    )
    .await?;

    tracing::info!(user_id = %user.id, "User logged in successfully");

    Ok(HttpResponse::Ok().json(AuthResponse::new(pair, Some(&user))))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh token: it is consumed and a new pair is
/// returned. Presenting it again fails.
///
/// # Errors
/// - 400: missing token
/// - 401: token invalid, expired, unknown or already consumed
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    store: web::Data<dyn CredentialStore>,
    jwt_config: web::Data<JwtSettings>,
    auth_config: web::Data<AuthSettings>,
) -> Result<HttpResponse, AppError> {
    let presented = require_refresh_token(&form)?;

    let (user, pair) = rotate_session(
        store.get_ref(),
        presented,
        jwt_config.get_ref(),
        auth_config.max_refresh_tokens_per_user,
    )
    .await?;

    tracing::info!(user_id = %user.id, "Token refreshed successfully");

    Ok(HttpResponse::Ok().json(AuthResponse::new(pair, None)))
}

/// POST /auth/logout
///
/// **Requires a valid access token.** Removes the given refresh token from
/// the caller's own sessions; unknown tokens are ignored.
pub async fn logout(
    identity: web::ReqData<Identity>,
    form: web::Json<RefreshRequest>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let presented = require_refresh_token(&form)?;

    end_session(store.get_ref(), identity.user_id, presented).await?;

    tracing::info!(user_id = %identity.user_id, "User logged out");

    Ok(HttpResponse::Ok().json(MessageResponse::new("Logged out successfully")))
}
