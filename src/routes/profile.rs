/// Profile Routes
///
/// `GET /me` and `PUT /me` always act on the authenticated subject's own
/// record.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Deserializer};

use crate::error::AppError;
use crate::middleware::Identity;
use crate::store::CredentialStore;
use crate::user::{Address, UserChanges, UserProfile};
use crate::validators::{are_valid_addresses, is_valid_name, is_valid_phone};

/// Partial profile update; absent fields are left unchanged
#[derive(Deserialize, Default)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Absent leaves the phone alone, `null` clears it
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default)]
    pub addresses: Option<Vec<Address>>,
}

/// Marks a field as present even when its value is `null`
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl UpdateProfileRequest {
    fn into_changes(self) -> Result<UserChanges, AppError> {
        let name = self.name.as_deref().map(is_valid_name).transpose()?;
        let phone = match self.phone {
            Some(Some(phone)) => Some(is_valid_phone(&phone)?),
            Some(None) => Some(None),
            None => None,
        };
        let addresses = self.addresses.map(are_valid_addresses).transpose()?;

        Ok(UserChanges {
            name,
            phone,
            addresses,
            role: None,
        })
    }
}

/// GET /me
///
/// **Requires a valid access token.**
///
/// # Errors
/// - 401: missing or invalid token (handled by middleware)
/// - 404: the token's subject no longer exists
pub async fn get_profile(
    identity: web::ReqData<Identity>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let user = store
        .find_by_id(identity.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}

/// PUT /me
///
/// **Requires a valid access token.** Accepts `name`, `phone` and
/// `addresses`; the role, email and sessions cannot be changed here.
///
/// # Errors
/// - 400: invalid field values
/// - 404: the token's subject no longer exists
pub async fn update_profile(
    identity: web::ReqData<Identity>,
    form: web::Json<UpdateProfileRequest>,
    store: web::Data<dyn CredentialStore>,
) -> Result<HttpResponse, AppError> {
    let changes = form.into_inner().into_changes()?;

    let user = if changes.is_empty() {
        store.find_by_id(identity.user_id).await?
    } else {
        store.update(identity.user_id, changes).await?
    }
    .ok_or_else(|| AppError::NotFound("User".to_string()))?;

    tracing::info!(user_id = %user.id, "Profile updated");

    Ok(HttpResponse::Ok().json(UserProfile::from(&user)))
}
