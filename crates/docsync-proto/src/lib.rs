//! docsync protocol types.
//!
//! This crate defines the data model shared by change feeds, watermark stores
//! and observers. Every type round-trips through `serde`, so change batches can
//! be read from JSON exports and watermarks persisted as JSON.
//!
//! # Modules
//!
//! - [`timestamp`] - Logical timestamps used as watermarks
//! - [`document`] - Document payloads carried by change records
//! - [`change`] - Change records, batches and the watermark filter
//! - [`error`] - Protocol error types

pub mod change;
pub mod document;
pub mod error;
pub mod timestamp;

pub use change::{ChangeBatch, ChangeKind, ChangeRecord, WatermarkFilter};
pub use document::Document;
pub use error::Error;
pub use timestamp::Timestamp;
