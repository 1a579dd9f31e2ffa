//! Core error types.

use thiserror::Error;

use crate::feed::FeedError;

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A change record lacks the last-updated field.
    #[error("document {document} is missing required field `{field}`")]
    MissingTimestamp { field: String, document: String },

    /// A change record carries an unreadable last-updated field.
    #[error("document {document} has an invalid `{field}` value: {reason}")]
    InvalidTimestamp {
        field: String,
        document: String,
        reason: String,
    },

    /// The feed delivered nothing where a batch was expected.
    #[error("no snapshot delivered by change feed")]
    MissingSnapshot,

    /// The change feed reported an error.
    #[error("change feed error: {0}")]
    Feed(#[from] FeedError),

    /// Subscription could not be established.
    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// Watermark store failure.
    #[error("watermark store error: {0}")]
    Store(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
}
