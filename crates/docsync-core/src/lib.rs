//! docsync core - Checkpointed change observation.
//!
//! This crate turns a raw change feed into created/updated/removed events,
//! resuming from a persisted watermark so a restarted process only sees
//! changes it has not handled yet.

pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod notifier;
pub mod observer;
pub mod store;

pub use config::ObserverConfig;
pub use error::Error;
pub use feed::{
    ChangeFeed, FeedError, FeedEvent, FeedSubscription, MemoryFeed, SharedChangeFeed, Unsubscribe,
};
pub use metrics::{MetricsSnapshot, ObserverMetrics, SharedObserverMetrics};
pub use notifier::{Listener, ListenerError, ListenerToken, Notifier};
pub use observer::{ChangeObserver, ConnectionState, ObserverEvent, ObserverFactory};
pub use store::{
    KeyValueStorage, KeyValueWatermarkStore, MemoryStorage, MemoryWatermarkStore,
    SharedWatermarkStore, SledStorage, WatermarkStore,
};

/// Re-export protocol types.
pub use docsync_proto as proto;
