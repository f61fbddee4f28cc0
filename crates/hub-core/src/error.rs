//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Identifier was empty or whitespace only
    #[error("{field} must not be empty")]
    EmptyIdentifier { field: String },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl DomainError {
    /// Shorthand for an empty-identifier error.
    pub fn empty(field: &str) -> Self {
        Self::EmptyIdentifier {
            field: field.to_string(),
        }
    }

    /// Shorthand for an invalid-value error.
    pub fn invalid(field: &str, value: impl ToString, expected: &str) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
