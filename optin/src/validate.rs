// SPDX-License-Identifier: MIT

//! Field-level validation helpers.
//!
//! These run synchronously before anything durable happens, and failures are
//! never retried; the request itself is wrong. Messages name the offending
//! field so forms can surface them inline.

use crate::error::Error;

/// Normalize an email address for use as a token subject.
///
/// Trims surrounding whitespace and lowercases, so the address a subscriber
/// confirms with matches the one they signed up with regardless of casing.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check that `email` is plausibly deliverable.
///
/// This is deliberately shallow: one `@`, a non-empty local part and a
/// domain with a dot, no whitespace. The real arbiter is the confirmation
/// email itself; an address that can't receive it will simply never confirm.
pub fn validate_email(email: &str) -> Result<(), Error> {
    let invalid = |reason: &str| Error::Validation {
        field: "email",
        reason: reason.to_string(),
    };

    if email.is_empty() {
        return Err(invalid("an email address is required"));
    }
    if email.len() > 254 {
        return Err(invalid("the email address is too long"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid("the email address must not contain spaces"));
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid("the email address must contain an @"));
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || domain.contains('@') {
        return Err(invalid("the email address is not valid"));
    }

    Ok(())
}

pub(crate) fn require_field(field: &'static str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation {
            field,
            reason: format!("{field} is required"),
        });
    }
    Ok(())
}

pub(crate) fn require_url(field: &'static str, value: &str) -> Result<(), Error> {
    require_field(field, value)?;
    if !(value.starts_with("https://") || value.starts_with("http://"))
        || value.chars().any(char::is_whitespace)
    {
        return Err(Error::Validation {
            field,
            reason: format!("{field} must be an http(s) URL"),
        });
    }
    Ok(())
}

// Dates are YYYY-MM-DD. This checks the shape and the obvious ranges; the
// downstream repository is the arbiter of calendar validity.
pub(crate) fn require_date(field: &'static str, value: &str) -> Result<(), Error> {
    let bad = || Error::Validation {
        field,
        reason: format!("{field} must be formatted as YYYY-MM-DD"),
    };

    let mut parts = value.split('-');
    let (year, month, day) = (
        parts.next().ok_or_else(bad)?,
        parts.next().ok_or_else(bad)?,
        parts.next().ok_or_else(bad)?,
    );
    if parts.next().is_some() || year.len() != 4 || month.len() != 2 || day.len() != 2 {
        return Err(bad());
    }
    let _year: u16 = year.parse().map_err(|_| bad())?;
    let month: u8 = month.parse().map_err(|_| bad())?;
    let day: u8 = day.parse().map_err(|_| bad())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(bad());
    }

    Ok(())
}
