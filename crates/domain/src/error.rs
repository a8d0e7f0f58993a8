//! Domain error types.

use thiserror::Error;

/// Errors raised while building or validating domain entities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A user field failed validation.
    #[error("Invalid user {field}: {reason}")]
    InvalidUser { field: &'static str, reason: String },

    /// An engagement event failed validation.
    #[error("Invalid engagement event: {0}")]
    InvalidEvent(String),
}

impl DomainError {
    pub(crate) fn user(field: &'static str, reason: impl Into<String>) -> Self {
        DomainError::InvalidUser {
            field,
            reason: reason.into(),
        }
    }
}
