/// Authentication module
///
/// Handles JWT token issuance/validation, password hashing,
/// and refresh-token session rotation.

mod claims;
mod jwt;
mod password;
mod session;

pub use claims::{Claims, TokenType};
pub use jwt::{generate_token_pair, validate_access_token, validate_refresh_token, TokenPair};
pub use password::{hash_password, verify_password};
pub use session::{end_session, hash_token, issue_session, rotate_session};
