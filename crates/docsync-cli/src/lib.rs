//! docsync-tail library.
//!
//! Reads JSON-lines change batches, runs them through a checkpointed
//! observer backed by a sled watermark database and prints the resulting
//! events as JSON lines.

pub mod config;
pub mod error;
pub mod tail;

pub use config::{Args, TailConfig};
pub use error::Error;
pub use tail::{run, show_watermark, SharedOutput, TailSummary};
