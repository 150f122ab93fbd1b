//! Secret request validation

use appctl::errors::Error;
use base64::Engine;
use regex::Regex;

use crate::server::secrets::SecretRequest;

pub const MAX_SECRET_ID_LENGTH: usize = 255;
pub const MAX_DECODED_VALUE_LENGTH: usize = 64 * 1024;

fn id_pattern() -> Regex {
    Regex::new(r"^[a-zA-Z0-9-_]+$").expect("static regex")
}

fn owner_pattern() -> Regex {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static regex")
}

/// Validation for create. Required: id, ownerGroup, value; ownerUser is
/// populated from the authenticated claims before this runs, and both owner
/// addresses are checked when present.
pub fn validate_create(request: &SecretRequest) -> Result<(), Error> {
    if request.id.is_empty() || request.owner_group.is_empty() || request.value.is_empty() {
        return Err(Error::Validation(
            "one or more required fields missing for create".into(),
        ));
    }
    let owners = owner_pattern();
    if !owners.is_match(&request.owner_group)
        || (!request.owner_user.is_empty() && !owners.is_match(&request.owner_user))
    {
        return Err(Error::Validation(
            "one or both of ownerUser, ownerGroup isn't a valid email address".into(),
        ));
    }
    if !id_pattern().is_match(&request.id) || request.id.len() >= MAX_SECRET_ID_LENGTH {
        return Err(Error::Validation(format!(
            "id must only contain letters, numbers, hyphens and underscores, max len is {MAX_SECRET_ID_LENGTH}"
        )));
    }
    check_value(&request.value)?;
    Ok(())
}

/// Validation for update: only the value may be present; id is in the URL,
/// owners are immutable by convention.
pub fn validate_update(request: &SecretRequest) -> Result<(), Error> {
    if !request.id.is_empty()
        || !request.owner_group.is_empty()
        || !request.owner_user.is_empty()
        || request.value.is_empty()
    {
        return Err(Error::Validation(
            "only value should be present for update, or value is empty".into(),
        ));
    }
    check_value(&request.value)?;
    Ok(())
}

/// The value must be base64 and decode to at most 64KiB.
pub fn decode_value(value: &str) -> Result<Vec<u8>, Error> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| Error::Validation(format!("could not decode value as b64: {e}")))
}

fn check_value(value: &str) -> Result<(), Error> {
    let decoded = decode_value(value)?;
    if decoded.len() > MAX_DECODED_VALUE_LENGTH {
        return Err(Error::Validation(format!(
            "value decodes to {} bytes, max is {MAX_DECODED_VALUE_LENGTH}",
            decoded.len()
        )));
    }
    Ok(())
}
