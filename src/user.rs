/// User records and their client-facing projections
///
/// `User` is the full stored record, including the password hash and the
/// refresh-token digests. It is deliberately not `Serialize`; responses use
/// `UserSummary` or `UserProfile`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Always stored lower-cased
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub phone: Option<String>,
    pub addresses: Vec<Address>,
    /// SHA-256 digests of the refresh tokens that may still be exchanged
    pub refresh_tokens: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A freshly registered user with the `user` role
    pub fn new(id: Uuid, name: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            email,
            password_hash,
            role: Role::User,
            phone: None,
            addresses: Vec::new(),
            refresh_tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Partial update applied by the store
///
/// `None` leaves a field untouched. `phone: Some(None)` clears the phone.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub phone: Option<Option<String>>,
    pub addresses: Option<Vec<Address>>,
    pub role: Option<Role>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.addresses.is_none() && self.role.is_none()
    }

    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(phone) = self.phone {
            user.phone = phone;
        }
        if let Some(addresses) = self.addresses {
            user.addresses = addresses;
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        user.updated_at = Utc::now();
    }
}

/// Short user view returned with token pairs and in admin listings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl UserSummary {
    /// Summary embedded in register/login responses
    pub fn brief(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            phone: None,
            created_at: None,
        }
    }

    /// Summary used by the admin listing
    pub fn listing(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            phone: user.phone.clone(),
            created_at: Some(user.created_at.to_rfc3339()),
        }
    }
}

/// Full profile of the authenticated user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub phone: Option<String>,
    pub addresses: Vec<Address>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            phone: user.phone.clone(),
            addresses: user.addresses.clone(),
            created_at: user.created_at.to_rfc3339(),
            updated_at: user.updated_at.to_rfc3339(),
        }
    }
}
