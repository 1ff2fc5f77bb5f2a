/// JWT Token Generation and Validation
///
/// Access and refresh tokens are HS256 JWTs signed with separate secrets.
/// Validation checks signature, issuer, expiry (no leeway) and that the
/// token's `typ` matches the kind being validated.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{Claims, TokenType};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::user::Role;

/// Freshly issued access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Issue a signed access/refresh pair for `user_id`
///
/// # Errors
/// Returns error if encoding fails
pub fn generate_token_pair(
    user_id: Uuid,
    role: Role,
    config: &JwtSettings,
) -> Result<TokenPair, AppError> {
    let access = Claims::new(
        user_id,
        role,
        TokenType::Access,
        config.access_token_expiry,
        config.issuer.clone(),
    );
    let refresh = Claims::new(
        user_id,
        role,
        TokenType::Refresh,
        config.refresh_token_expiry,
        config.issuer.clone(),
    );

    Ok(TokenPair {
        access_token: sign(&access, &config.access_secret)?,
        refresh_token: sign(&refresh, &config.refresh_secret)?,
        expires_in: config.access_token_expiry,
    })
}

fn sign(claims: &Claims, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Validate and extract claims from an access token
///
/// # Errors
/// `TokenExpired` past expiry, `TokenInvalid` for anything else
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AuthError> {
    validate(token, &config.access_secret, &config.issuer, TokenType::Access)
}

/// Validate and extract claims from a refresh token
///
/// Only checks the signature and timing; whether the token is still part of
/// its owner's session set is decided by the store.
pub fn validate_refresh_token(token: &str, config: &JwtSettings) -> Result<Claims, AuthError> {
    validate(token, &config.refresh_secret, &config.issuer, TokenType::Refresh)
}

fn validate(
    token: &str,
    secret: &str,
    issuer: &str,
    expected: TokenType,
) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[issuer]);
    validation.leeway = 0;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "JWT validation error");
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        }
    })?;

    if claims.typ != expected {
        return Err(AuthError::TokenInvalid);
    }
    Ok(claims)
}
