//! Observer construction over a shared feed and key/value medium.

use std::sync::Arc;

use crate::config::ObserverConfig;
use crate::feed::SharedChangeFeed;
use crate::store::{KeyValueStorage, KeyValueWatermarkStore};

use super::ChangeObserver;

/// Builds observers that share one change feed and one storage medium.
///
/// Each observer persists its watermark under its own key, so observers
/// created here never contend for a watermark unless given the same key.
pub struct ObserverFactory<S> {
    feed: SharedChangeFeed,
    storage: Arc<S>,
    key_prefix: String,
}

impl<S: KeyValueStorage + 'static> ObserverFactory<S> {
    /// Create a factory with no key prefix.
    pub fn new(feed: SharedChangeFeed, storage: S) -> Self {
        Self::from_shared(feed, Arc::new(storage))
    }

    /// Create a factory over an already shared medium.
    pub fn from_shared(feed: SharedChangeFeed, storage: Arc<S>) -> Self {
        Self {
            feed,
            storage,
            key_prefix: String::new(),
        }
    }

    /// Prefix every store key, e.g. with an application name.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The full storage key for `store_key`.
    pub fn storage_key(&self, store_key: &str) -> String {
        if self.key_prefix.is_empty() {
            store_key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, store_key)
        }
    }

    /// Watermark store for `store_key`.
    pub fn store(&self, store_key: &str) -> KeyValueWatermarkStore<Arc<S>> {
        KeyValueWatermarkStore::new(self.storage.clone(), self.storage_key(store_key))
    }

    /// Create a disconnected observer persisting under `store_key`.
    pub fn create(&self, store_key: &str, config: ObserverConfig) -> ChangeObserver {
        let store = self.store(store_key);
        tracing::debug!(
            key = %store.key(),
            field = %config.last_updated_field,
            "creating observer"
        );
        ChangeObserver::new(self.feed.clone(), Arc::new(store), config)
    }
}

impl<S> std::fmt::Debug for ObserverFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverFactory")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}
