//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation of inputs handed to
/// the broker). Storage and runtime concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A required request parameter was missing or blank.
    #[error("must provide parameter: {0}")]
    MissingParameter(&'static str),
}
