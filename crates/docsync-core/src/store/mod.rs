//! Watermark persistence.
//!
//! This module provides:
//! - [`WatermarkStore`] - The async capability an observer persists its watermark through
//! - [`MemoryWatermarkStore`] - Process-local store
//! - [`KeyValueWatermarkStore`] - JSON-encoded watermark under a key of a [`KeyValueStorage`]
//! - [`MemoryStorage`] / [`SledStorage`] - Key/value media for the above

mod kv;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use docsync_proto::Timestamp;

use crate::error::Error;

pub use kv::{KeyValueStorage, KeyValueWatermarkStore, MemoryStorage, SledStorage};
pub use memory::MemoryWatermarkStore;

/// Persistence for the last processed timestamp.
///
/// Operations are not transactional with the change feed. A single observer
/// is assumed per stored watermark.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Load the persisted watermark.
    ///
    /// Returns `None` if nothing was stored or the stored value is unreadable.
    async fn get(&self) -> Result<Option<Timestamp>, Error>;

    /// Persist a watermark, replacing any previous value.
    async fn set(&self, watermark: Timestamp) -> Result<(), Error>;

    /// Clear the persisted watermark.
    async fn remove(&self) -> Result<(), Error>;
}

#[async_trait]
impl<T: WatermarkStore + ?Sized> WatermarkStore for Arc<T> {
    async fn get(&self) -> Result<Option<Timestamp>, Error> {
        (**self).get().await
    }

    async fn set(&self, watermark: Timestamp) -> Result<(), Error> {
        (**self).set(watermark).await
    }

    async fn remove(&self) -> Result<(), Error> {
        (**self).remove().await
    }
}

/// Shared watermark store handle.
pub type SharedWatermarkStore = Arc<dyn WatermarkStore>;
