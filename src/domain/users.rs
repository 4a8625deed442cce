//! Profile field rules shared by onboarding and profile edits.

use crate::domain::error::DomainError;

pub const USERNAME_MAX_LEN: usize = 32;
pub const NAME_MAX_LEN: usize = 64;
pub const BIO_MAX_LEN: usize = 1000;

/// Normalise a requested username: trimmed, without a leading `@`, lowercase.
///
/// Usernames are what `@mentions` resolve against, so they are restricted to
/// the characters a mention token can contain.
pub fn normalize_username(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(DomainError::validation("username", "must not be empty"));
    }
    if trimmed.chars().count() > USERNAME_MAX_LEN {
        return Err(DomainError::validation(
            "username",
            format!("must be at most {USERNAME_MAX_LEN} characters"),
        ));
    }
    if !trimmed.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
        return Err(DomainError::validation(
            "username",
            "may only contain letters, digits and underscores",
        ));
    }

    Ok(trimmed.to_lowercase())
}

pub fn normalize_name(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("name", "must not be empty"));
    }
    if trimmed.chars().count() > NAME_MAX_LEN {
        return Err(DomainError::validation(
            "name",
            format!("must be at most {NAME_MAX_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_bio(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() > BIO_MAX_LEN {
        return Err(DomainError::validation(
            "bio",
            format!("must be at most {BIO_MAX_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}
