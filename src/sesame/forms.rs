//! Form payloads and their validation rules.
//!
//! Validation is pure and never fails: it returns the field errors to show next to
//! each input. Bodies are decoded leniently: a missing field is an empty string,
//! a repeated field keeps its first value, and an undecodable body is an empty
//! form, so every bad submission ends up as field errors on the re-rendered page.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use utoipa::ToSchema;

pub const USERNAME_MIN: usize = 4;
pub const USERNAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 6;
pub const PASSWORD_MAX: usize = 20;

pub const MSG_REQUIRED: &str = "This field is required.";
pub const MSG_PASSWORDS_MUST_MATCH: &str = "Passwords must match";

#[derive(ToSchema, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
    pub csrf_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub csrf_token: String,
}

// Passwords stay out of logs.
impl std::fmt::Debug for RegisterForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterForm")
            .field("username", &self.username)
            .field("password", &"***")
            .field("confirm_password", &"***")
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("password", &"***")
            .finish_non_exhaustive()
    }
}

/// Field name to error messages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors {
    fields: BTreeMap<&'static str, Vec<String>>,
}

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_default().push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn field(&self, field: &str) -> &[String] {
        self.fields.get(field).map_or(&[], Vec::as_slice)
    }
}

/// Decode an `application/x-www-form-urlencoded` body, keeping the first value of
/// each repeated key.
#[must_use]
pub fn parse_urlencoded(body: &[u8]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body) {
        fields
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    fields
}

fn take(fields: &mut HashMap<String, String>, key: &str) -> String {
    fields.remove(key).unwrap_or_default()
}

fn length_message(min: usize, max: usize) -> String {
    format!("Field must be between {min} and {max} characters long.")
}

/// Presence check first; the remaining rules only run on a non-empty value.
fn check_field(
    errors: &mut FormErrors,
    field: &'static str,
    value: &str,
    bounds: Option<(usize, usize)>,
) -> bool {
    if value.is_empty() {
        errors.add(field, MSG_REQUIRED);
        return false;
    }

    if let Some((min, max)) = bounds {
        let len = value.chars().count();
        if len < min || len > max {
            errors.add(field, length_message(min, max));
            return false;
        }
    }

    true
}

impl RegisterForm {
    #[must_use]
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut fields = parse_urlencoded(body);
        Self {
            username: take(&mut fields, "username"),
            password: take(&mut fields, "password"),
            confirm_password: take(&mut fields, "confirm_password"),
            csrf_token: take(&mut fields, "csrf_token"),
        }
    }

    #[must_use]
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();

        check_field(
            &mut errors,
            "username",
            &self.username,
            Some((USERNAME_MIN, USERNAME_MAX)),
        );
        check_field(
            &mut errors,
            "password",
            &self.password,
            Some((PASSWORD_MIN, PASSWORD_MAX)),
        );
        if check_field(&mut errors, "confirm_password", &self.confirm_password, None)
            && self.confirm_password != self.password
        {
            errors.add("confirm_password", MSG_PASSWORDS_MUST_MATCH);
        }

        errors
    }
}

impl LoginForm {
    #[must_use]
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut fields = parse_urlencoded(body);
        Self {
            username: take(&mut fields, "username"),
            password: take(&mut fields, "password"),
            csrf_token: take(&mut fields, "csrf_token"),
        }
    }

    #[must_use]
    pub fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        check_field(&mut errors, "username", &self.username, None);
        check_field(&mut errors, "password", &self.password, None);
        errors
    }
}
