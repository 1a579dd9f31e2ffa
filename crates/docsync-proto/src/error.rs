//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A required document field is absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A timestamp value could not be interpreted.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}
