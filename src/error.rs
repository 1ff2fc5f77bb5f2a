/// Application Error Handling
///
/// Domain-specific error enums funnel into a single `AppError`, which maps to
/// an HTTP status and a JSON body of the shape `{"error": ..., "code": ...}`.
/// Server-side failures are logged in full but answered with a generic
/// message, so store or hashing details never reach the client.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Validation errors for input data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(String),
    TooShort(String, usize),
    TooLong(String, usize),
    InvalidFormat(String),
    SuspiciousContent(String),
    MalformedBody(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "{} is empty", field),
            ValidationError::TooShort(field, min) => {
                write!(f, "{} is too short (minimum {} characters)", field, min)
            }
            ValidationError::TooLong(field, max) => {
                write!(f, "{} is too long (maximum {} characters)", field, max)
            }
            ValidationError::InvalidFormat(field) => write!(f, "{} has invalid format", field),
            ValidationError::SuspiciousContent(field) => {
                write!(f, "{} contains suspicious content", field)
            }
            ValidationError::MalformedBody(msg) => write!(f, "malformed request body: {}", msg),
        }
    }
}

impl StdError for ValidationError {}

/// Credential store errors
#[derive(Debug)]
pub enum StoreError {
    /// A user with the same email already exists
    DuplicateEmail,
    QueryExecution(String),
    ConnectionPool(String),
    UnexpectedError(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateEmail => write!(f, "Email already registered"),
            StoreError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            StoreError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            StoreError::UnexpectedError(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl StdError for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                StoreError::DuplicateEmail
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::ConnectionPool(err.to_string())
            }
            sqlx::Error::Database(_) | sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::QueryExecution(err.to_string())
            }
            _ => StoreError::UnexpectedError(err.to_string()),
        }
    }
}

/// Authentication errors, all answered with 401
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,
    MissingToken,
    InvalidRefreshToken,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid email or password"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::TokenInvalid => write!(f, "Invalid token"),
            AuthError::MissingToken => write!(f, "Missing authentication token"),
            AuthError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Auth(AuthError),
    Forbidden,
    NotFound(String),
    Conflict(String),
    Store(StoreError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Forbidden => write!(f, "Insufficient permissions"),
            AppError::NotFound(what) => write!(f, "{} not found", what),
            AppError::Conflict(msg) => write!(f, "{}", msg),
            AppError::Store(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AppError::Conflict(err.to_string()),
            other => AppError::Store(other),
        }
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error body returned to clients
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl AppError {
    /// Machine-readable code included in the error body
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                AuthError::TokenExpired | AuthError::TokenInvalid => "TOKEN_INVALID",
                AuthError::MissingToken => "MISSING_TOKEN",
                AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            },
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Store(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the client
    fn public_message(&self) -> String {
        match self {
            AppError::Auth(AuthError::TokenExpired) | AppError::Auth(AuthError::TokenInvalid) => {
                "Invalid or expired token".to_string()
            }
            AppError::Store(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn log_error(&self, error_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(error_id = error_id, error = %e, "Validation error");
            }
            AppError::Auth(AuthError::InvalidCredentials) => {
                tracing::warn!(error_id = error_id, error = %self, "Invalid credentials attempt");
            }
            AppError::Auth(e) => {
                tracing::warn!(error_id = error_id, error = %e, "Authentication error");
            }
            AppError::Forbidden => {
                tracing::warn!(error_id = error_id, "Forbidden request");
            }
            AppError::NotFound(_) => {
                tracing::info!(error_id = error_id, error = %self, "Resource not found");
            }
            AppError::Conflict(_) => {
                tracing::warn!(error_id = error_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Store(e) => {
                tracing::error!(error_id = error_id, error = %e, "Credential store error");
            }
            AppError::Internal(msg) => {
                tracing::error!(error_id = error_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let error_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&error_id);

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.public_message(),
            code: self.code(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
