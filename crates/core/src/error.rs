//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Only deterministic input failures live here. Storage, filesystem and
/// remote-service failures are modelled by the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. empty name, zero box count).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A decimal measure could not be parsed or is out of range.
    #[error("invalid measure: {0}")]
    InvalidMeasure(String),

    /// An identifier was invalid (e.g. parse failure, non-positive id).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_measure(msg: impl Into<String>) -> Self {
        Self::InvalidMeasure(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
