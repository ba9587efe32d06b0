use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("email pattern compiles")
});

pub const REQUIRED: &str = "Required";
pub const INVALID_EMAIL: &str = "Invalid email address";
pub const NEWSLETTER_EMAIL_MISSING: &str = "Please enter your email address";
pub const NEWSLETTER_EMAIL_INVALID: &str = "Please enter a valid email address";

pub fn is_valid_email(raw: &str) -> bool {
    EMAIL_PATTERN.is_match(raw.trim())
}

/// Per-field messages for the comment form. `None` means the field is fine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldErrors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.body.is_none()
    }

    /// Messages in form order, prefixed with the field name.
    pub fn summary(&self) -> String {
        [
            ("name", &self.name),
            ("email", &self.email),
            ("body", &self.body),
        ]
        .into_iter()
        .filter_map(|(field, message)| message.as_ref().map(|m| format!("{field}: {m}")))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

pub fn validate_comment(name: &str, email: &str, body: &str) -> FieldErrors {
    let mut errors = FieldErrors::default();
    if name.trim().is_empty() {
        errors.name = Some(REQUIRED.to_string());
    }
    if email.trim().is_empty() {
        errors.email = Some(REQUIRED.to_string());
    } else if !is_valid_email(email) {
        errors.email = Some(INVALID_EMAIL.to_string());
    }
    if body.trim().is_empty() {
        errors.body = Some(REQUIRED.to_string());
    }
    errors
}

/// Returns the message to show under the footer signup field, if any.
pub fn validate_newsletter_email(email: &str) -> Option<&'static str> {
    if email.trim().is_empty() {
        Some(NEWSLETTER_EMAIL_MISSING)
    } else if !is_valid_email(email) {
        Some(NEWSLETTER_EMAIL_INVALID)
    } else {
        None
    }
}
