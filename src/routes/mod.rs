mod admin;
mod auth;
mod health_check;
mod profile;

use serde::Serialize;

pub use admin::{delete_user, list_users, require_admin};
pub use auth::{login, logout, refresh, register};
pub use health_check::health_check;
pub use profile::{get_profile, update_profile};

/// Plain confirmation body
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
