// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side checks run before any identity-service request.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SessionError;
use crate::identity::{LoginCredentials, RegistrationForm};

/// Minimum credential length for registration.
pub const MIN_CREDENTIAL_LEN: usize = 8;

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

pub fn validate_login(credentials: &LoginCredentials) -> Result<(), SessionError> {
    require("identifier", &credentials.identifier)?;
    require("credential", &credentials.credential)?;
    require("secondary factor", &credentials.secondary_factor)?;
    Ok(())
}

pub fn validate_registration(form: &RegistrationForm) -> Result<(), SessionError> {
    require("identifier", &form.identifier)?;
    require("credential", &form.credential)?;
    require("secondary factor", &form.secondary_factor)?;

    if !is_email(form.identifier.trim()) {
        return Err(SessionError::validation(
            "identifier",
            "identifier must be a valid email address",
        ));
    }
    check_strength(&form.credential)
}

fn require(field: &'static str, value: &str) -> Result<(), SessionError> {
    if value.trim().is_empty() {
        return Err(SessionError::validation(field, format!("{field} is required")));
    }
    Ok(())
}

fn is_email(value: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(value))
}

/// Minimum length plus mixed case and a digit.
fn check_strength(credential: &str) -> Result<(), SessionError> {
    if credential.chars().count() < MIN_CREDENTIAL_LEN {
        return Err(SessionError::validation(
            "credential",
            format!("credential must be at least {MIN_CREDENTIAL_LEN} characters"),
        ));
    }
    let upper = credential.chars().any(|c| c.is_uppercase());
    let lower = credential.chars().any(|c| c.is_lowercase());
    let digit = credential.chars().any(|c| c.is_ascii_digit());
    if !(upper && lower && digit) {
        return Err(SessionError::validation(
            "credential",
            "credential must contain an uppercase letter, a lowercase letter, and a digit",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
