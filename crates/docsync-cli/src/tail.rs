//! Replays change batches through a checkpointed observer.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Notify;

use docsync_core::{
    ChangeObserver, FeedError, MemoryFeed, ObserverEvent, ObserverFactory, SharedChangeFeed,
    SledStorage, WatermarkStore,
};
use docsync_proto::{ChangeBatch, Document, Timestamp};

use crate::config::TailConfig;
use crate::error::Error;

/// Output shared between event listeners.
pub type SharedOutput<W> = Arc<Mutex<W>>;

/// One emitted event, as printed.
#[derive(Debug, Serialize)]
struct EventLine<'a> {
    event: &'static str,
    id: &'a str,
    data: &'a Map<String, JsonValue>,
}

/// Outcome of a tail run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailSummary {
    /// Input lines parsed as batches.
    pub batches_read: usize,
    /// Events printed.
    pub events_emitted: u64,
    /// Batches or feed items that failed.
    pub errors: u64,
    /// Watermark at the end of the run.
    pub watermark: Option<Timestamp>,
}

/// Print the stored watermark as a JSON line.
pub async fn show_watermark<W: Write>(
    db: &sled::Db,
    config: &TailConfig,
    out: &mut W,
) -> Result<Option<Timestamp>, Error> {
    let factory = factory(db, Arc::new(MemoryFeed::new()))?;
    let watermark = factory.store(&config.store_key).get().await?;

    let line = serde_json::json!({
        "key": factory.storage_key(&config.store_key),
        "watermark": watermark.map(|ts| ts.to_json()),
        "time": watermark.map(|ts| ts.to_string()),
    });
    serde_json::to_writer(&mut *out, &line)?;
    out.write_all(b"\n")?;
    Ok(watermark)
}

/// Feed every batch read from `input` through an observer, printing events to `out`.
///
/// Batches are published through a [`MemoryFeed`], so records at or before
/// the stored watermark are filtered out and a rerun over the same input only
/// prints what is new.
pub async fn run<R, W>(
    db: &sled::Db,
    config: &TailConfig,
    input: R,
    out: SharedOutput<W>,
) -> Result<TailSummary, Error>
where
    R: AsyncBufRead + Unpin,
    W: Write + Send + 'static,
{
    let feed = MemoryFeed::new();
    let factory = factory(db, Arc::new(feed.clone()))?;

    if config.clear {
        factory.store(&config.store_key).remove().await?;
        tracing::info!(key = %config.store_key, "watermark cleared");
    }

    let observer = factory.create(&config.store_key, config.observer.clone());
    for event in ObserverEvent::ALL {
        let out = out.clone();
        let print = move |doc: &Document| -> Result<(), docsync_core::ListenerError> {
            let mut out = out.lock();
            serde_json::to_writer(&mut *out, &EventLine {
                event: event.as_str(),
                id: &doc.id,
                data: &doc.data,
            })?;
            out.write_all(b"\n")?;
            Ok(())
        };
        match event {
            ObserverEvent::DocumentCreated => observer.on_created(print),
            ObserverEvent::DocumentUpdated => observer.on_updated(print),
            ObserverEvent::DocumentRemoved => observer.on_removed(print),
        };
    }

    let drained = Arc::new(Notify::new());
    {
        let drained = drained.clone();
        observer.on_error(move |err| {
            match err {
                docsync_core::Error::Feed(FeedError::Closed) => drained.notify_one(),
                other => tracing::warn!(error = %other, "batch failed"),
            }
            Ok(())
        });
    }

    observer.connect().await?;
    let batches_read = publish_lines(&feed, input).await?;

    // Closing the feed lets the observer finish every queued batch first.
    feed.close();
    drained.notified().await;
    observer.disconnect();

    summarize(&observer, batches_read).await
}

async fn publish_lines<R>(feed: &MemoryFeed, input: R) -> Result<usize, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut line_no = 0;
    let mut batches = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let batch: ChangeBatch = serde_json::from_str(line).map_err(|source| Error::Parse {
            line: line_no,
            source,
        })?;
        tracing::debug!(line = line_no, records = batch.len(), "publishing batch");
        feed.publish(batch).await;
        batches += 1;
    }

    Ok(batches)
}

async fn summarize(observer: &ChangeObserver, batches_read: usize) -> Result<TailSummary, Error> {
    let metrics = observer.metrics();
    let summary = TailSummary {
        batches_read,
        events_emitted: metrics.created_emitted + metrics.updated_emitted + metrics.removed_emitted,
        // The closing feed is reported as one error.
        errors: metrics.batch_errors.saturating_sub(1),
        watermark: observer.last_sync_timestamp().await.ok(),
    };

    tracing::info!(
        batches = summary.batches_read,
        skipped = metrics.batches_skipped,
        events = summary.events_emitted,
        errors = summary.errors,
        listener_failures = metrics.listener_failures,
        watermark = ?summary.watermark,
        "tail complete"
    );
    Ok(summary)
}

fn factory(db: &sled::Db, feed: SharedChangeFeed) -> Result<ObserverFactory<SledStorage>, Error> {
    Ok(ObserverFactory::new(feed, SledStorage::open(db)?))
}
