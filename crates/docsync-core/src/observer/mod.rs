//! Checkpointed change observer.
//!
//! A [`ChangeObserver`] resumes a change feed from a persisted watermark,
//! classifies every delivered change into created/updated/removed events and
//! moves the watermark forward as records are handled.
//!
//! ```ignore
//! let observer = ChangeObserver::new(feed, store, ObserverConfig::new("updatedAt"));
//! observer.on_created(|doc| { println!("created {}", doc.id); Ok(()) });
//! observer.on_error(|err| { eprintln!("sync failed: {err}"); Ok(()) });
//! observer.connect().await?;
//! ```

mod factory;
mod processor;
mod watermark;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use docsync_proto::{Document, Timestamp, WatermarkFilter};

use crate::config::ObserverConfig;
use crate::error::Error;
use crate::feed::{FeedSubscription, SharedChangeFeed, Unsubscribe};
use crate::metrics::{MetricsSnapshot, ObserverMetrics, SharedObserverMetrics};
use crate::notifier::{ListenerError, ListenerToken, Notifier};
use crate::store::SharedWatermarkStore;

pub use factory::ObserverFactory;
pub use processor::classify;
pub use watermark::{advance_watermark, load_watermark};

use processor::{AdvanceLock, BatchProcessor};

/// Semantic events emitted by an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverEvent {
    /// A document was added.
    DocumentCreated,
    /// A document was modified.
    DocumentUpdated,
    /// A document was soft-deleted.
    DocumentRemoved,
}

impl ObserverEvent {
    /// Every event, in declaration order.
    pub const ALL: [ObserverEvent; 3] = [
        ObserverEvent::DocumentCreated,
        ObserverEvent::DocumentUpdated,
        ObserverEvent::DocumentRemoved,
    ];

    /// Event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverEvent::DocumentCreated => "DOCUMENT_CREATED",
            ObserverEvent::DocumentUpdated => "DOCUMENT_UPDATED",
            ObserverEvent::DocumentRemoved => "DOCUMENT_REMOVED",
        }
    }
}

impl fmt::Display for ObserverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No subscription.
    Disconnected,
    /// Loading the watermark and subscribing.
    Connecting,
    /// Subscription active.
    Connected,
}

struct ActiveSubscription {
    filter: WatermarkFilter,
    unsubscribe: Unsubscribe,
    stop: oneshot::Sender<()>,
}

impl ActiveSubscription {
    fn cancel(self) -> WatermarkFilter {
        // Stop first so the loop does not report the closing channel as an error.
        let _ = self.stop.send(());
        self.unsubscribe.call();
        self.filter
    }
}

/// Watches a change feed from a persisted watermark and emits typed events.
///
/// One observer should own a stored watermark at a time; sharing one across
/// observers lets their read-then-write advancement interleave.
pub struct ChangeObserver {
    config: Arc<ObserverConfig>,
    feed: SharedChangeFeed,
    store: SharedWatermarkStore,
    events: Arc<Notifier<ObserverEvent, Document>>,
    errors: Arc<Notifier<(), Error>>,
    metrics: SharedObserverMetrics,
    advance_lock: AdvanceLock,
    state: Mutex<ConnectionState>,
    subscription: Mutex<Option<ActiveSubscription>>,
}

impl ChangeObserver {
    /// Create a disconnected observer.
    pub fn new(feed: SharedChangeFeed, store: SharedWatermarkStore, config: ObserverConfig) -> Self {
        Self {
            config: Arc::new(config),
            feed,
            store,
            events: Arc::new(Notifier::new()),
            errors: Arc::new(Notifier::new()),
            metrics: Arc::new(ObserverMetrics::new()),
            advance_lock: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(ConnectionState::Disconnected),
            subscription: Mutex::new(None),
        }
    }

    /// Register a handler for `DOCUMENT_CREATED`.
    pub fn on_created<F>(&self, handler: F) -> ListenerToken
    where
        F: Fn(&Document) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.events.on(ObserverEvent::DocumentCreated, handler)
    }

    /// Register a handler for `DOCUMENT_UPDATED`.
    pub fn on_updated<F>(&self, handler: F) -> ListenerToken
    where
        F: Fn(&Document) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.events.on(ObserverEvent::DocumentUpdated, handler)
    }

    /// Register a handler for `DOCUMENT_REMOVED`.
    pub fn on_removed<F>(&self, handler: F) -> ListenerToken
    where
        F: Fn(&Document) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.events.on(ObserverEvent::DocumentRemoved, handler)
    }

    /// Register a handler for errors raised while streaming.
    ///
    /// Receives feed errors, records without a usable timestamp and store
    /// failures hit during a batch. Without a handler these are only logged.
    ///
    /// A feed that ends on its own is reported as
    /// [`FeedError::Closed`](crate::feed::FeedError::Closed). Nothing is
    /// delivered after it, but the observer stays [`ConnectionState::Connected`]
    /// until [`disconnect`](Self::disconnect) is called.
    pub fn on_error<F>(&self, handler: F) -> ListenerToken
    where
        F: Fn(&Error) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.errors.on((), handler)
    }

    /// Remove a document event handler.
    pub fn remove_listener(&self, event: ObserverEvent, token: ListenerToken) -> bool {
        self.events.remove_listener(&event, token)
    }

    /// Remove an error handler.
    pub fn remove_error_listener(&self, token: ListenerToken) -> bool {
        self.errors.remove_listener(&(), token)
    }

    /// Start observing changes newer than the stored watermark.
    ///
    /// Returns `Ok(false)` without touching the existing subscription when
    /// already connected or connecting. Store and subscribe failures leave the
    /// observer disconnected.
    ///
    /// This includes a subscription whose feed has closed: call
    /// [`disconnect`](Self::disconnect) first to resubscribe.
    pub async fn connect(&self) -> Result<bool, Error> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Disconnected {
                warn!(state = ?*state, "listener is already subscribed");
                return Ok(false);
            }
            *state = ConnectionState::Connecting;
        }

        let guard = ConnectingGuard { state: &self.state };
        let active = self.subscribe().await?;
        let filter = active.filter.clone();

        *self.subscription.lock() = Some(active);
        *self.state.lock() = ConnectionState::Connected;
        std::mem::forget(guard);

        info!(%filter, "observer connected");
        Ok(true)
    }

    async fn subscribe(&self) -> Result<ActiveSubscription, Error> {
        let watermark = load_watermark(self.store.as_ref(), self.config.initial_watermark).await?;
        let filter = WatermarkFilter::new(self.config.last_updated_field.clone(), watermark);

        let FeedSubscription {
            events,
            unsubscribe,
        } = self.feed.subscribe(filter.clone()).await?;

        let (stop, stop_rx) = oneshot::channel();
        let processor = BatchProcessor::new(
            self.config.clone(),
            self.advance_lock.clone(),
            self.store.clone(),
            self.events.clone(),
            self.errors.clone(),
            self.metrics.clone(),
        );
        tokio::spawn(processor.run(events, stop_rx));

        Ok(ActiveSubscription {
            filter,
            unsubscribe,
            stop,
        })
    }

    /// Stop observing.
    ///
    /// A batch already being processed runs to completion; batches queued
    /// behind it are dropped. Returns `false` when not connected.
    pub fn disconnect(&self) -> bool {
        let Some(active) = self.subscription.lock().take() else {
            warn!("no active subscription to disconnect");
            return false;
        };

        let filter = active.cancel();
        *self.state.lock() = ConnectionState::Disconnected;
        info!(%filter, "observer disconnected");
        true
    }

    /// Clear the persisted watermark.
    ///
    /// An active subscription keeps the filter it was created with.
    pub async fn clear_last_sync_timestamp(&self) -> Result<(), Error> {
        self.store.remove().await?;
        info!(field = %self.config.last_updated_field, "last sync timestamp cleared");
        Ok(())
    }

    /// The persisted watermark, or the configured initial watermark.
    pub async fn last_sync_timestamp(&self) -> Result<Timestamp, Error> {
        load_watermark(self.store.as_ref(), self.config.initial_watermark).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether a subscription is active.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Filter of the active subscription.
    pub fn current_filter(&self) -> Option<WatermarkFilter> {
        self.subscription
            .lock()
            .as_ref()
            .map(|active| active.filter.clone())
    }

    /// The observer configuration.
    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Activity counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            listener_failures: self.events.failure_count() + self.errors.failure_count(),
            ..self.metrics.snapshot()
        }
    }
}

impl Drop for ChangeObserver {
    fn drop(&mut self) {
        if let Some(active) = self.subscription.get_mut().take() {
            let filter = active.cancel();
            tracing::debug!(%filter, "observer dropped while connected");
        }
    }
}

impl fmt::Debug for ChangeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeObserver")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("filter", &self.current_filter())
            .finish()
    }
}

/// Resets a half-finished connect, including when its future is dropped.
struct ConnectingGuard<'a> {
    state: &'a Mutex<ConnectionState>,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ChangeFeed, MemoryFeed};
    use crate::store::{MemoryWatermarkStore, WatermarkStore};
    use async_trait::async_trait;

    struct FailingFeed;

    #[async_trait]
    impl ChangeFeed for FailingFeed {
        async fn subscribe(&self, _filter: WatermarkFilter) -> Result<FeedSubscription, Error> {
            Err(Error::Subscribe("permission denied".into()))
        }
    }

    struct FailingStore;

    #[async_trait]
    impl WatermarkStore for FailingStore {
        async fn get(&self) -> Result<Option<Timestamp>, Error> {
            Err(Error::Store("disk unavailable".into()))
        }

        async fn set(&self, _watermark: Timestamp) -> Result<(), Error> {
            Err(Error::Store("disk unavailable".into()))
        }

        async fn remove(&self) -> Result<(), Error> {
            Err(Error::Store("disk unavailable".into()))
        }
    }

    fn observer(feed: &MemoryFeed) -> ChangeObserver {
        ChangeObserver::new(
            Arc::new(feed.clone()),
            Arc::new(MemoryWatermarkStore::new()),
            ObserverConfig::new("updatedAt"),
        )
    }

    #[test]
    fn test_event_names() {
        let names: Vec<&str> = ObserverEvent::ALL.iter().map(|e| e.as_str()).collect();
        assert_eq!(names, vec!["DOCUMENT_CREATED", "DOCUMENT_UPDATED", "DOCUMENT_REMOVED"]);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let feed = MemoryFeed::new();
        let observer = observer(&feed);
        assert_eq!(observer.state(), ConnectionState::Disconnected);

        assert!(observer.connect().await.unwrap());
        assert!(observer.is_connected());
        assert_eq!(feed.subscriber_count(), 1);
        assert_eq!(
            observer.current_filter(),
            Some(WatermarkFilter::new("updatedAt", Timestamp::default_watermark()))
        );

        assert!(observer.disconnect());
        assert_eq!(observer.state(), ConnectionState::Disconnected);
        assert_eq!(feed.subscriber_count(), 0);
        assert!(observer.current_filter().is_none());
    }

    #[tokio::test]
    async fn test_double_connect_is_rejected() {
        let feed = MemoryFeed::new();
        let observer = observer(&feed);

        assert!(observer.connect().await.unwrap());
        let filter = observer.current_filter();
        assert!(!observer.connect().await.unwrap());

        assert_eq!(feed.subscriber_count(), 1);
        assert_eq!(observer.current_filter(), filter);
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected() {
        let feed = MemoryFeed::new();
        let observer = observer(&feed);
        assert!(!observer.disconnect());
    }

    #[tokio::test]
    async fn test_subscribe_failure_leaves_disconnected() {
        let observer = ChangeObserver::new(
            Arc::new(FailingFeed),
            Arc::new(MemoryWatermarkStore::new()),
            ObserverConfig::new("updatedAt"),
        );

        assert!(matches!(observer.connect().await, Err(Error::Subscribe(_))));
        assert_eq!(observer.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_store_failures_propagate() {
        let feed = MemoryFeed::new();
        let observer = ChangeObserver::new(
            Arc::new(feed.clone()),
            Arc::new(FailingStore),
            ObserverConfig::new("updatedAt"),
        );

        assert!(matches!(observer.connect().await, Err(Error::Store(_))));
        assert_eq!(observer.state(), ConnectionState::Disconnected);
        assert_eq!(feed.subscriber_count(), 0);
        assert!(matches!(
            observer.clear_last_sync_timestamp().await,
            Err(Error::Store(_))
        ));
    }

    #[test]
    fn test_remove_error_listener() {
        let feed = MemoryFeed::new();
        let observer = observer(&feed);

        let token = observer.on_error(|_| Ok(()));
        observer.on_error(|_| Ok(()));
        assert_eq!(observer.errors.listener_count(&()), 2);

        assert!(observer.remove_error_listener(token));
        assert!(!observer.remove_error_listener(token));
        assert_eq!(observer.errors.listener_count(&()), 1);
        // Error tokens do not remove document listeners.
        assert!(!observer.remove_listener(ObserverEvent::DocumentCreated, token));
    }

    #[tokio::test]
    async fn test_drop_cancels_subscription() {
        let feed = MemoryFeed::new();
        {
            let observer = observer(&feed);
            observer.connect().await.unwrap();
            assert_eq!(feed.subscriber_count(), 1);
        }
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_initial_watermark_from_config() {
        let feed = MemoryFeed::new();
        let observer = ChangeObserver::new(
            Arc::new(feed.clone()),
            Arc::new(MemoryWatermarkStore::new()),
            ObserverConfig::new("updatedAt").with_initial_watermark(Timestamp::from_seconds(7)),
        );

        assert_eq!(observer.last_sync_timestamp().await.unwrap(), Timestamp::from_seconds(7));
        observer.connect().await.unwrap();
        assert_eq!(feed.filters()[0].after, Timestamp::from_seconds(7));
    }
}
