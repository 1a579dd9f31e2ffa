//! Key/value backed watermark store.
//!
//! The watermark is stored as a JSON `{"seconds", "nanoseconds"}` object under
//! a caller-chosen key. The storage medium is injected through
//! [`KeyValueStorage`], so the same encoding works over an in-memory map or an
//! embedded sled tree.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sled::{Db, Tree};

use docsync_proto::Timestamp;

use super::WatermarkStore;
use crate::error::Error;

/// Name of the sled tree holding watermarks.
pub const WATERMARK_TREE: &str = "watermarks";

/// A string key/value medium.
pub trait KeyValueStorage: Send + Sync {
    /// Read the value stored under `key`.
    fn get_item(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store `value` under `key`.
    fn set_item(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Delete the value stored under `key`.
    fn remove_item(&self, key: &str) -> Result<(), Error>;
}

impl<S: KeyValueStorage + ?Sized> KeyValueStorage for Arc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), Error> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<(), Error> {
        (**self).remove_item(key)
    }
}

/// Process-local key/value medium.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), Error> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), Error> {
        self.items.lock().remove(key);
        Ok(())
    }
}

/// Durable key/value medium backed by a sled tree.
///
/// Writes are flushed before returning so a persisted watermark survives a
/// crash right after it is acknowledged.
#[derive(Debug, Clone)]
pub struct SledStorage {
    tree: Tree,
}

impl SledStorage {
    /// Open or create the watermark tree in the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(WATERMARK_TREE)?;
        Ok(Self { tree })
    }
}

impl KeyValueStorage for SledStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        match self.tree.get(key.as_bytes())? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|e| Error::Store(format!("non-utf8 value under {}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), Error> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), Error> {
        self.tree.remove(key.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// Watermark store persisting JSON under a single key of a [`KeyValueStorage`].
#[derive(Debug)]
pub struct KeyValueWatermarkStore<S> {
    storage: S,
    key: String,
}

impl<S: KeyValueStorage> KeyValueWatermarkStore<S> {
    /// Create a store writing under `key`.
    pub fn new(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// The storage key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying medium.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn decode(&self, raw: &str) -> Option<Timestamp> {
        let parsed = serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|e| e.to_string())
            .and_then(|value| Timestamp::from_json(&value).map_err(|e| e.to_string()));

        match parsed {
            Ok(timestamp) => Some(timestamp),
            Err(reason) => {
                tracing::warn!(key = %self.key, %reason, "ignoring unreadable stored watermark");
                None
            }
        }
    }
}

#[async_trait]
impl<S: KeyValueStorage> WatermarkStore for KeyValueWatermarkStore<S> {
    async fn get(&self) -> Result<Option<Timestamp>, Error> {
        Ok(self
            .storage
            .get_item(&self.key)?
            .and_then(|raw| self.decode(&raw)))
    }

    async fn set(&self, watermark: Timestamp) -> Result<(), Error> {
        self.storage
            .set_item(&self.key, &watermark.to_json().to_string())
    }

    async fn remove(&self) -> Result<(), Error> {
        self.storage.remove_item(&self.key)
    }
}
