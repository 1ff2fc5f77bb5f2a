/// Input validators
///
/// Every value accepted from a request body passes through here before it
/// reaches the store. Validators return the normalised value.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;
use crate::user::Address;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MAX_NAME_LENGTH: usize = 256;
const MAX_PASSWORD_BYTES: usize = 72; // bcrypt input limit
const MAX_PHONE_LENGTH: usize = 32;
const MAX_ADDRESS_FIELD_LENGTH: usize = 256;
const MAX_ADDRESSES: usize = 20;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex is valid");

    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ().-]+$").expect("phone regex is valid");
}

fn field(name: &str) -> String {
    name.to_string()
}

/// Validates an email address and returns it trimmed and lower-cased
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field("email")));
    }
    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort(field("email"), MIN_EMAIL_LENGTH));
    }
    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong(field("email"), MAX_EMAIL_LENGTH));
    }
    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat(field("email")));
    }
    if has_suspicious_email_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent(field("email")));
    }

    Ok(trimmed.to_lowercase())
}

/// Validates a display name and returns it trimmed
pub fn is_valid_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(field("name")));
    }
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong(field("name"), MAX_NAME_LENGTH));
    }
    if has_control_characters(trimmed) {
        return Err(ValidationError::SuspiciousContent(field("name")));
    }

    Ok(trimmed.to_string())
}

/// Passwords are taken verbatim; only emptiness and bcrypt's input limit
/// are checked
pub fn is_valid_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField(field("password")));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(ValidationError::TooLong(field("password"), MAX_PASSWORD_BYTES));
    }
    Ok(())
}

/// Validates a phone number; blank input clears the phone
pub fn is_valid_phone(phone: &str) -> Result<Option<String>, ValidationError> {
    let trimmed = phone.trim();

    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_PHONE_LENGTH {
        return Err(ValidationError::TooLong(field("phone"), MAX_PHONE_LENGTH));
    }
    if !PHONE_REGEX.is_match(trimmed) || !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat(field("phone")));
    }

    Ok(Some(trimmed.to_string()))
}

/// Validates a list of postal addresses, trimming every field
pub fn are_valid_addresses(addresses: Vec<Address>) -> Result<Vec<Address>, ValidationError> {
    if addresses.len() > MAX_ADDRESSES {
        return Err(ValidationError::TooLong(field("addresses"), MAX_ADDRESSES));
    }

    addresses
        .into_iter()
        .map(|address| {
            let state = match address.state {
                Some(state) if !state.trim().is_empty() => {
                    Some(address_field("state", &state)?)
                }
                _ => None,
            };
            Ok(Address {
                street: address_field("street", &address.street)?,
                city: address_field("city", &address.city)?,
                state,
                postal_code: address_field("postalCode", &address.postal_code)?,
                country: address_field("country", &address.country)?,
            })
        })
        .collect()
}

fn address_field(name: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    let name = format!("address.{}", name);

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField(name));
    }
    if trimmed.len() > MAX_ADDRESS_FIELD_LENGTH {
        return Err(ValidationError::TooLong(name, MAX_ADDRESS_FIELD_LENGTH));
    }
    if has_control_characters(trimmed) {
        return Err(ValidationError::SuspiciousContent(name));
    }
    Ok(trimmed.to_string())
}

/// Detects suspicious patterns in email addresses
fn has_suspicious_email_patterns(email: &str) -> bool {
    if let Some(at_pos) = email.find('@') {
        if email[..at_pos].len() > MAX_LOCAL_PART_LENGTH {
            return true;
        }
    }
    email.matches('@').count() != 1 || email.contains('\0')
}

fn has_control_characters(value: &str) -> bool {
    value.chars().any(|c| c.is_control())
}
