//! Change-feed capability.
//!
//! A feed turns a [`WatermarkFilter`] into a stream of [`FeedEvent`]s delivered
//! over a bounded channel, in commit order, plus a single-use [`Unsubscribe`]
//! handle. Errors travel through the same channel as batches.

mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use docsync_proto::{ChangeBatch, WatermarkFilter};

use crate::error::Error;

pub use memory::MemoryFeed;

/// Default capacity of a subscription channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Errors reported by a change feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The feed fired without a snapshot.
    #[error("feed delivered no snapshot")]
    MissingSnapshot,

    /// The feed stopped delivering without being asked to.
    #[error("change feed closed")]
    Closed,

    /// Backend-reported failure (permissions, quota, network).
    #[error("{0}")]
    Remote(String),
}

/// One item delivered by a feed.
pub type FeedEvent = Result<ChangeBatch, FeedError>;

/// Single-use cancellation handle for a subscription.
pub struct Unsubscribe(Box<dyn FnOnce() + Send + Sync>);

impl Unsubscribe {
    /// Wrap a cancellation callback.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self(Box::new(cancel))
    }

    /// Cancel the subscription.
    pub fn call(self) {
        (self.0)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe")
    }
}

/// An established subscription.
#[derive(Debug)]
pub struct FeedSubscription {
    /// Batches and errors, in delivery order.
    pub events: mpsc::Receiver<FeedEvent>,
    /// Cancels delivery.
    pub unsubscribe: Unsubscribe,
}

/// Live query over a document collection.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to changes matching `filter`.
    async fn subscribe(&self, filter: WatermarkFilter) -> Result<FeedSubscription, Error>;
}

/// Shared change feed handle.
pub type SharedChangeFeed = Arc<dyn ChangeFeed>;
