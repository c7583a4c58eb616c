//! Domain error model.

use thiserror::Error;

/// Result type used across the shared primitives.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (parsing, validation).
/// Storage and network concerns have their own error types in the offline crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// An operation type tag is not part of the known vocabulary.
    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_operation_type(tag: impl Into<String>) -> Self {
        Self::UnknownOperationType(tag.into())
    }
}
