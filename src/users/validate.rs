//! Sign-up and password-change input rules.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]{3,20}$").expect("static regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .expect("static regex")
});

static SPECIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[!@#$%^&*()_+\-=\[\]{};':"\\|,.<>/?]"#).expect("static regex"));

/// Longest accepted password.
pub const MAX_PASSWORD_LEN: usize = 100;

/// Longest accepted nickname.
pub const MAX_NICKNAME_LEN: usize = 50;

/// Whether `password` meets the strength rule: at least 8 characters with a
/// letter, a digit and a special character.
#[must_use]
pub fn is_strong_password(password: &str) -> bool {
    if password.trim().is_empty() || password.chars().count() < 8 {
        return false;
    }
    password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
        && SPECIAL_RE.is_match(password)
}

/// Reject weak or oversized passwords.
pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() > MAX_PASSWORD_LEN {
        return Err(Error::bad_request(
            "INVALID_PASSWORD",
            format!("Password must be at most {MAX_PASSWORD_LEN} characters"),
        ));
    }
    if !is_strong_password(password) {
        return Err(Error::bad_request(
            "WEAK_PASSWORD",
            "Password must be at least 8 characters and contain a letter, a digit and a special character",
        ));
    }
    Ok(())
}

/// Validate every sign-up field.
pub fn validate_signup(
    username: &str,
    email: &str,
    password: &str,
    nickname: Option<&str>,
) -> Result<()> {
    if !USERNAME_RE.is_match(username) {
        return Err(Error::bad_request(
            "INVALID_USERNAME",
            "Username must be 3-20 characters of letters, digits or underscore",
        ));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(Error::bad_request("INVALID_EMAIL", "Email address is not valid"));
    }
    if nickname.is_some_and(|n| n.chars().count() > MAX_NICKNAME_LEN) {
        return Err(Error::bad_request(
            "INVALID_NICKNAME",
            format!("Nickname must be at most {MAX_NICKNAME_LEN} characters"),
        ));
    }
    validate_password(password)
}
