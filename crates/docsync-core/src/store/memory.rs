//! In-memory watermark store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use docsync_proto::Timestamp;

use super::WatermarkStore;
use crate::error::Error;

/// Watermark store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<Timestamp>>,
    writes: AtomicU64,
}

impl MemoryWatermarkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding an initial watermark.
    pub fn with_watermark(watermark: Timestamp) -> Self {
        Self {
            value: Mutex::new(Some(watermark)),
            writes: AtomicU64::new(0),
        }
    }

    /// Current value without going through the async interface.
    pub fn peek(&self) -> Option<Timestamp> {
        *self.value.lock()
    }

    /// Number of `set` calls made so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self) -> Result<Option<Timestamp>, Error> {
        Ok(*self.value.lock())
    }

    async fn set(&self, watermark: Timestamp) -> Result<(), Error> {
        *self.value.lock() = Some(watermark);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self) -> Result<(), Error> {
        *self.value.lock() = None;
        Ok(())
    }
}
