//! Error types for registry operations.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur against a coordination registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry backend error: {0}")]
    Backend(String),

    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node not empty: {0}")]
    NotEmpty(String),

    #[error("invalid registry path: {0}")]
    InvalidPath(String),

    #[error("malformed payload at {0}: {1}")]
    Payload(String, String),
}
