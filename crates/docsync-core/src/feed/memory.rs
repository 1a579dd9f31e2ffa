//! In-process change feed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use docsync_proto::{ChangeBatch, WatermarkFilter};

use super::{ChangeFeed, FeedError, FeedEvent, FeedSubscription, Unsubscribe, DEFAULT_CHANNEL_CAPACITY};
use crate::error::Error;

struct Subscriber {
    filter: WatermarkFilter,
    tx: mpsc::Sender<FeedEvent>,
}

struct FeedInner {
    /// Active subscribers keyed by subscription ID.
    subscribers: Mutex<BTreeMap<u64, Subscriber>>,
    /// Next subscription ID.
    next_subscription_id: AtomicU64,
    /// Channel capacity per subscriber.
    capacity: usize,
}

/// A change feed driven by the host process.
///
/// Batches handed to [`publish`](Self::publish) are filtered per subscriber:
/// records whose last-updated value is readable and not after the
/// subscriber's bound are dropped. Records without a readable value are
/// forwarded untouched so that consumers can report them. Cloning yields
/// another handle to the same feed.
#[derive(Clone)]
pub struct MemoryFeed {
    inner: Arc<FeedInner>,
}

impl MemoryFeed {
    /// Create a feed with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a feed whose subscription channels hold `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                subscribers: Mutex::new(BTreeMap::new()),
                next_subscription_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Deliver a batch to every subscriber, applying each subscriber's filter.
    ///
    /// Waits for channel capacity. Returns the number of subscribers reached.
    pub async fn publish(&self, batch: ChangeBatch) -> usize {
        let delivered = self
            .send_each(|filter| {
                let changes = batch
                    .changes
                    .iter()
                    .filter(|record| filter.matches(&record.document).unwrap_or(true))
                    .cloned()
                    .collect();
                Ok(ChangeBatch {
                    changes,
                    has_pending_writes: batch.has_pending_writes,
                })
            })
            .await;

        tracing::trace!(
            records = batch.len(),
            pending = batch.has_pending_writes,
            delivered,
            "published batch"
        );
        delivered
    }

    /// Deliver a batch to every subscriber as-is, bypassing their filters.
    pub async fn deliver(&self, batch: ChangeBatch) -> usize {
        self.send_each(|_| Ok(batch.clone())).await
    }

    /// Deliver an error to every subscriber.
    pub async fn publish_error(&self, error: FeedError) -> usize {
        self.send_each(|_| Err(error.clone())).await
    }

    /// End every subscription, closing their channels.
    pub fn close(&self) {
        let removed = std::mem::take(&mut *self.inner.subscribers.lock());
        tracing::debug!(subscriptions = removed.len(), "memory feed closed");
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Filters of the active subscriptions, oldest first.
    pub fn filters(&self) -> Vec<WatermarkFilter> {
        self.inner
            .subscribers
            .lock()
            .values()
            .map(|s| s.filter.clone())
            .collect()
    }

    async fn send_each<F>(&self, make_event: F) -> usize
    where
        F: Fn(&WatermarkFilter) -> FeedEvent,
    {
        let mut delivered = 0;
        for (subscription_id, filter, tx) in self.targets() {
            if tx.send(make_event(&filter)).await.is_ok() {
                delivered += 1;
            } else {
                self.drop_subscriber(subscription_id);
            }
        }
        delivered
    }

    fn targets(&self) -> Vec<(u64, WatermarkFilter, mpsc::Sender<FeedEvent>)> {
        self.inner
            .subscribers
            .lock()
            .iter()
            .map(|(&id, s)| (id, s.filter.clone(), s.tx.clone()))
            .collect()
    }

    fn drop_subscriber(&self, subscription_id: u64) {
        Self::remove(&self.inner, subscription_id);
    }

    fn remove(inner: &FeedInner, subscription_id: u64) -> bool {
        let removed = inner.subscribers.lock().remove(&subscription_id).is_some();
        if removed {
            tracing::debug!(subscription_id, "subscription removed");
        }
        removed
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFeed")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, filter: WatermarkFilter) -> Result<FeedSubscription, Error> {
        let subscription_id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.inner.capacity);

        tracing::debug!(subscription_id, %filter, "subscription created");
        self.inner
            .subscribers
            .lock()
            .insert(subscription_id, Subscriber { filter, tx });

        let weak: Weak<FeedInner> = Arc::downgrade(&self.inner);
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                Self::remove(&inner, subscription_id);
            }
        });

        Ok(FeedSubscription {
            events: rx,
            unsubscribe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_proto::{ChangeRecord, Document, Timestamp};

    fn doc(id: &str, seconds: i64) -> Document {
        Document::new(id).with_timestamp("ts", Timestamp::from_seconds(seconds))
    }

    #[tokio::test]
    async fn test_publish_applies_filter() {
        let feed = MemoryFeed::new();
        let mut sub = feed
            .subscribe(WatermarkFilter::new("ts", Timestamp::from_seconds(100)))
            .await
            .unwrap();

        let batch = ChangeBatch::new(vec![
            ChangeRecord::added(doc("old", 50)),
            ChangeRecord::added(doc("same", 100)),
            ChangeRecord::added(doc("new", 150)),
            ChangeRecord::added(Document::new("untimed")),
        ]);
        assert_eq!(feed.publish(batch).await, 1);

        let received = sub.events.recv().await.unwrap().unwrap();
        let ids: Vec<&str> = received.changes.iter().map(|c| c.document.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "untimed"]);
    }

    #[tokio::test]
    async fn test_deliver_bypasses_filter() {
        let feed = MemoryFeed::new();
        let mut sub = feed
            .subscribe(WatermarkFilter::new("ts", Timestamp::from_seconds(100)))
            .await
            .unwrap();

        let batch = ChangeBatch::new(vec![ChangeRecord::added(doc("old", 50))]);
        feed.deliver(batch.clone()).await;

        assert_eq!(sub.events.recv().await.unwrap(), Ok(batch));
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let feed = MemoryFeed::new();
        let sub = feed
            .subscribe(WatermarkFilter::new("ts", Timestamp::default_watermark()))
            .await
            .unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        let FeedSubscription {
            mut events,
            unsubscribe,
        } = sub;
        unsubscribe.call();

        assert_eq!(feed.subscriber_count(), 0);
        assert!(events.recv().await.is_none());
        assert_eq!(feed.publish(ChangeBatch::default()).await, 0);
    }

    #[tokio::test]
    async fn test_publish_error() {
        let feed = MemoryFeed::new();
        let mut sub = feed
            .subscribe(WatermarkFilter::new("ts", Timestamp::default_watermark()))
            .await
            .unwrap();

        feed.publish_error(FeedError::Remote("permission denied".into())).await;
        let event = sub.events.recv().await.unwrap();
        assert_eq!(event, Err(FeedError::Remote("permission denied".into())));
    }

    #[tokio::test]
    async fn test_filters_and_close() {
        let feed = MemoryFeed::new();
        let _a = feed
            .subscribe(WatermarkFilter::new("ts", Timestamp::from_seconds(1)))
            .await
            .unwrap();
        let mut b = feed
            .subscribe(WatermarkFilter::new("ts", Timestamp::from_seconds(2)))
            .await
            .unwrap();

        let bounds: Vec<Timestamp> = feed.filters().into_iter().map(|f| f.after).collect();
        assert_eq!(bounds, vec![Timestamp::from_seconds(1), Timestamp::from_seconds(2)]);

        feed.close();
        assert_eq!(feed.subscriber_count(), 0);
        assert!(b.events.recv().await.is_none());
    }
}
