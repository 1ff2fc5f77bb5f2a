/// Password Hashing and Verification
///
/// bcrypt with a configurable cost. Input rules (non-empty, within bcrypt's
/// 72-byte limit) are enforced by `validators::is_valid_password` before a
/// password reaches this module.

use bcrypt::{hash, verify};

use crate::error::AppError;

/// Hash a password using bcrypt
///
/// # Errors
/// Returns error if bcrypt rejects the cost or fails internally
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its hash
///
/// # Errors
/// Returns error if the stored hash is malformed
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}
