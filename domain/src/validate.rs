//! Input validation for user fields. Keep logic minimal and deterministic.
//!
//! Each validator reports every reason it finds (except that an empty value
//! short-circuits with a single "required" reason) so callers can surface the
//! full list in one round trip.

use crate::CoreError;

/// Characters that satisfy `PasswordValidator::require_special`.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;':\",./<>?";

/// A named check over one input field.
pub trait Validator<T: ?Sized> {
    /// Field name reported in `CoreError::Validation`.
    fn field(&self) -> &'static str;

    /// Every reason `value` is rejected; empty when valid.
    fn errors(&self, value: &T) -> Vec<String>;

    fn validate(&self, value: &T) -> Result<(), CoreError> {
        let errors = self.errors(value);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation {
                field: self.field(),
                errors,
            })
        }
    }

    fn is_valid(&self, value: &T) -> bool {
        self.errors(value).is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UsernameValidator {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for UsernameValidator {
    fn default() -> Self {
        Self {
            min_length: 3,
            max_length: 50,
        }
    }
}

impl Validator<str> for UsernameValidator {
    fn field(&self) -> &'static str {
        "username"
    }

    fn errors(&self, value: &str) -> Vec<String> {
        if value.is_empty() {
            return vec!["Username is required".into()];
        }
        let mut errors = Vec::new();
        let len = value.chars().count();
        if len < self.min_length {
            errors.push(format!(
                "Username must be at least {} characters",
                self.min_length
            ));
        }
        if len > self.max_length {
            errors.push(format!(
                "Username must be at most {} characters",
                self.max_length
            ));
        }
        if !value.chars().all(char::is_alphanumeric) {
            errors.push("Username must be alphanumeric".into());
        }
        errors
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailValidator {
    pub max_length: usize,
}

impl Default for EmailValidator {
    fn default() -> Self {
        Self { max_length: 255 }
    }
}

impl Validator<str> for EmailValidator {
    fn field(&self) -> &'static str {
        "email"
    }

    fn errors(&self, value: &str) -> Vec<String> {
        if value.is_empty() {
            return vec!["Email is required".into()];
        }
        let mut errors = Vec::new();
        // Lightweight check; full RFC compliance not required here
        if !value.contains('@') {
            errors.push("Invalid email format".into());
        }
        if value.chars().count() > self.max_length {
            errors.push(format!(
                "Email must be at most {} characters",
                self.max_length
            ));
        }
        errors
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PasswordValidator {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordValidator {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: false,
        }
    }
}

impl Validator<str> for PasswordValidator {
    fn field(&self) -> &'static str {
        "password"
    }

    fn errors(&self, value: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if value.chars().count() < self.min_length {
            errors.push(format!(
                "Password must be at least {} characters",
                self.min_length
            ));
        }
        if self.require_uppercase && !value.chars().any(char::is_uppercase) {
            errors.push("Password must contain uppercase letter".into());
        }
        if self.require_lowercase && !value.chars().any(char::is_lowercase) {
            errors.push("Password must contain lowercase letter".into());
        }
        if self.require_digit && !value.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain digit".into());
        }
        if self.require_special && !value.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            errors.push("Password must contain special character".into());
        }
        errors
    }
}

pub fn validate_username(s: &str) -> Result<(), CoreError> {
    UsernameValidator::default().validate(s)
}

pub fn validate_email(s: &str) -> Result<(), CoreError> {
    EmailValidator::default().validate(s)
}

pub fn validate_password(s: &str) -> Result<(), CoreError> {
    PasswordValidator::default().validate(s)
}

/// Run several validators and collect every reason, in order.
pub fn validate_all(checks: &[(&dyn Validator<str>, &str)]) -> Vec<String> {
    checks
        .iter()
        .flat_map(|(validator, value)| validator.errors(value))
        .collect()
}
