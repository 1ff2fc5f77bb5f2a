/// JWT Claims structure
///
/// Payload shared by access and refresh tokens: the subject, its role and
/// the standard RFC 7519 timing claims, plus a token type marker and a
/// random `jti` so two tokens minted in the same second never collide.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::user::Role;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
    pub jti: String,
    pub typ: TokenType,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        role: Role,
        typ: TokenType,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            role,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
            typ,
        }
    }

    /// Extract user ID from claims
    pub fn user_id(&self) -> Result<Uuid, AuthError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid)
    }
}
