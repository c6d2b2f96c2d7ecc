//! Error taxonomy shared by the repository port and the services.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::{EntityId, Permission, Status};

/// Why an authentication attempt was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    UserNotFound,
    InvalidPassword,
    /// Only reported once the password has verified.
    AccountInactive,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFailure::UserNotFound => "user not found",
            AuthFailure::InvalidPassword => "invalid password",
            AuthFailure::AccountInactive => "user account is not active",
        }
    }
}

impl Display for AuthFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed for {field}: {}", .errors.join("; "))]
    Validation {
        field: &'static str,
        errors: Vec<String>,
    },
    #[error("{resource} with id '{id}' not found")]
    NotFound {
        resource: &'static str,
        id: EntityId,
    },
    #[error("authentication failed: {0}")]
    Authentication(AuthFailure),
    #[error("missing required permission: {required}")]
    Authorization {
        required: Permission,
        granted: Vec<Permission>,
    },
    #[error("cannot change status from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },
    #[error("processing failed: {0}")]
    Processing(String),
    #[error("repository error: {0}")]
    Repository(String),
}

impl CoreError {
    pub fn user_not_found(id: EntityId) -> Self {
        CoreError::NotFound {
            resource: "User",
            id,
        }
    }

    /// Stable machine-readable code for presentation layers.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => "VALIDATION_ERROR",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Authentication(_) => "AUTHENTICATION_ERROR",
            CoreError::Authorization { .. } => "AUTHORIZATION_ERROR",
            CoreError::InvalidTransition { .. } => "INVALID_STATE",
            CoreError::Processing(_) => "PROCESSING_ERROR",
            CoreError::Repository(_) => "REPOSITORY_ERROR",
        }
    }

    /// Infrastructure failures are the only kind worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Repository(_))
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::from(self)
    }
}

/// Structured error body for an API or CLI layer:
/// `{"errorCode", "message", "field"?, "subErrors"?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_errors: Option<Vec<String>>,
}

impl From<&CoreError> for ErrorPayload {
    fn from(err: &CoreError) -> Self {
        let (field, sub_errors) = match err {
            CoreError::Validation { field, errors } => {
                (Some(field.to_string()), Some(errors.clone()))
            }
            CoreError::Authorization { granted, .. } => (
                None,
                Some(granted.iter().map(|p| p.as_str().to_string()).collect()),
            ),
            _ => (None, None),
        };
        Self {
            error_code: err.code(),
            message: err.to_string(),
            field,
            sub_errors,
        }
    }
}
