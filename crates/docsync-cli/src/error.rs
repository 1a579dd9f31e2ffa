//! CLI error types.

use thiserror::Error;

/// docsync-tail errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Observer or watermark store error.
    #[error("observer error: {0}")]
    Observer(#[from] docsync_core::Error),

    /// Watermark database error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// An input line is not a change batch.
    #[error("line {line}: invalid change batch: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Output encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
