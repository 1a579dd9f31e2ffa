//! Batch classification and the per-connection processing loop.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, trace};

use docsync_proto::{ChangeBatch, ChangeKind, ChangeRecord, Document, Timestamp};

use super::watermark::advance_watermark;
use super::ObserverEvent;
use crate::config::ObserverConfig;
use crate::error::Error;
use crate::feed::{FeedError, FeedEvent};
use crate::metrics::SharedObserverMetrics;
use crate::notifier::Notifier;
use crate::store::SharedWatermarkStore;

/// Map a feed change to the event it produces.
///
/// A set soft-delete flag turns additions and modifications into removals.
/// Feed-level removals produce nothing; deletion is expressed through the flag.
pub fn classify(kind: ChangeKind, soft_deleted: bool) -> Option<ObserverEvent> {
    match kind {
        ChangeKind::Added | ChangeKind::Modified if soft_deleted => {
            Some(ObserverEvent::DocumentRemoved)
        }
        ChangeKind::Added => Some(ObserverEvent::DocumentCreated),
        ChangeKind::Modified => Some(ObserverEvent::DocumentUpdated),
        ChangeKind::Removed => None,
    }
}

/// What happened to a delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchOutcome {
    /// Ignored because it carried pending local writes.
    Skipped,
    /// Every record was handled.
    Processed { records: usize, emitted: usize },
}

/// Serializes watermark advancement across every loop one observer spawns.
///
/// A loop stopped by `disconnect` may still be finishing its in-flight batch
/// when the next `connect` starts a new loop on the same store.
pub(crate) type AdvanceLock = Arc<AsyncMutex<()>>;

/// Applies delivered batches: watermark first, then the semantic event.
pub(crate) struct BatchProcessor {
    config: Arc<ObserverConfig>,
    advance_lock: AdvanceLock,
    store: SharedWatermarkStore,
    events: Arc<Notifier<ObserverEvent, Document>>,
    errors: Arc<Notifier<(), Error>>,
    metrics: SharedObserverMetrics,
}

impl BatchProcessor {
    pub(crate) fn new(
        config: Arc<ObserverConfig>,
        advance_lock: AdvanceLock,
        store: SharedWatermarkStore,
        events: Arc<Notifier<ObserverEvent, Document>>,
        errors: Arc<Notifier<(), Error>>,
        metrics: SharedObserverMetrics,
    ) -> Self {
        Self {
            config,
            advance_lock,
            store,
            events,
            errors,
            metrics,
        }
    }

    /// Process one batch.
    ///
    /// A record without a usable timestamp, or a store failure, aborts the
    /// rest of the batch. Listener failures do not.
    pub(crate) async fn process(&self, batch: &ChangeBatch) -> Result<BatchOutcome, Error> {
        if batch.has_pending_writes {
            self.metrics.record_skipped_batch();
            debug!(records = batch.len(), "skipping batch with pending writes");
            return Ok(BatchOutcome::Skipped);
        }

        let mut emitted = 0;
        for record in &batch.changes {
            let timestamp = self.extract_timestamp(record)?;
            let _advancing = self.advance_lock.lock().await;
            let advanced = advance_watermark(self.store.as_ref(), timestamp).await?;
            self.metrics.record_record(advanced);

            let soft_deleted = record.document.is_deleted(&self.config.deleted_field);
            match classify(record.kind, soft_deleted) {
                Some(event) => {
                    trace!(
                        document = %record.document.id,
                        kind = %record.kind,
                        event = %event,
                        %timestamp,
                        "dispatching change"
                    );
                    self.events.emit(&event, &record.document);
                    self.metrics.record_emit(event);
                    emitted += 1;
                }
                None => {
                    debug!(document = %record.document.id, "ignoring hard delete");
                }
            }
        }

        self.metrics.record_batch();
        Ok(BatchOutcome::Processed {
            records: batch.len(),
            emitted,
        })
    }

    fn extract_timestamp(&self, record: &ChangeRecord) -> Result<Timestamp, Error> {
        let field = &self.config.last_updated_field;
        match record.document.get(field) {
            None | Some(serde_json::Value::Null) => Err(Error::MissingTimestamp {
                field: field.clone(),
                document: record.document.id.clone(),
            }),
            Some(value) => Timestamp::from_json(value).map_err(|e| Error::InvalidTimestamp {
                field: field.clone(),
                document: record.document.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Route an error to the `on_error` listeners.
    pub(crate) fn report(&self, error: Error) {
        self.metrics.record_batch_error();
        if !self.errors.emit(&(), &error) {
            tracing::error!(error = %error, "unhandled observer error");
        }
    }

    /// Drain feed events until the feed closes or `stop` fires.
    ///
    /// `stop` is checked between batches only: a batch that has started
    /// processing always completes.
    pub(crate) async fn run(
        self,
        mut events: mpsc::Receiver<FeedEvent>,
        mut stop: oneshot::Receiver<()>,
    ) {
        info!(field = %self.config.last_updated_field, "observer loop started");

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stop => {
                    debug!("observer loop stop requested");
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(Ok(batch)) => match self.process(&batch).await {
                    Ok(BatchOutcome::Processed { records, emitted }) => {
                        debug!(records, emitted, "batch processed");
                    }
                    Ok(BatchOutcome::Skipped) => {}
                    Err(error) => self.report(error),
                },
                Some(Err(FeedError::MissingSnapshot)) => self.report(Error::MissingSnapshot),
                Some(Err(feed_error)) => self.report(Error::Feed(feed_error)),
                None => {
                    self.report(Error::Feed(FeedError::Closed));
                    break;
                }
            }
        }

        info!(field = %self.config.last_updated_field, "observer loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ObserverMetrics;
    use crate::store::{MemoryWatermarkStore, WatermarkStore};
    use parking_lot::Mutex;

    struct Harness {
        processor: BatchProcessor,
        store: Arc<MemoryWatermarkStore>,
        seen: Arc<Mutex<Vec<(ObserverEvent, String)>>>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryWatermarkStore::new());
        let events: Arc<Notifier<ObserverEvent, Document>> = Arc::new(Notifier::new());
        let error_notifier: Arc<Notifier<(), Error>> = Arc::new(Notifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        for event in ObserverEvent::ALL {
            let seen = seen.clone();
            events.on(event, move |doc: &Document| {
                seen.lock().push((event, doc.id.clone()));
                Ok(())
            });
        }
        let sink = errors.clone();
        error_notifier.on((), move |e: &Error| {
            sink.lock().push(e.to_string());
            Ok(())
        });

        let processor = BatchProcessor::new(
            Arc::new(ObserverConfig::new("ts")),
            Arc::new(AsyncMutex::new(())),
            store.clone(),
            events,
            error_notifier,
            Arc::new(ObserverMetrics::new()),
        );

        Harness {
            processor,
            store,
            seen,
            errors,
        }
    }

    fn doc(id: &str, seconds: i64) -> Document {
        Document::new(id).with_timestamp("ts", Timestamp::from_seconds(seconds))
    }

    #[test]
    fn test_classify() {
        use ObserverEvent::*;

        assert_eq!(classify(ChangeKind::Added, false), Some(DocumentCreated));
        assert_eq!(classify(ChangeKind::Added, true), Some(DocumentRemoved));
        assert_eq!(classify(ChangeKind::Modified, false), Some(DocumentUpdated));
        assert_eq!(classify(ChangeKind::Modified, true), Some(DocumentRemoved));
        assert_eq!(classify(ChangeKind::Removed, false), None);
        assert_eq!(classify(ChangeKind::Removed, true), None);
    }

    #[tokio::test]
    async fn test_process_emits_in_order() {
        let h = harness();
        let batch = ChangeBatch::new(vec![
            ChangeRecord::added(doc("a", 10)),
            ChangeRecord::modified(doc("b", 20)),
            ChangeRecord::modified(doc("c", 30).with_field("isDeleted", true)),
            ChangeRecord::removed(doc("d", 40)),
        ]);

        let outcome = h.processor.process(&batch).await.unwrap();
        assert_eq!(outcome, BatchOutcome::Processed { records: 4, emitted: 3 });

        assert_eq!(
            *h.seen.lock(),
            vec![
                (ObserverEvent::DocumentCreated, "a".to_string()),
                (ObserverEvent::DocumentUpdated, "b".to_string()),
                (ObserverEvent::DocumentRemoved, "c".to_string()),
            ]
        );
        // Hard deletes still carry the watermark forward.
        assert_eq!(h.store.peek(), Some(Timestamp::from_seconds(40)));
    }

    #[tokio::test]
    async fn test_pending_batch_is_ignored() {
        let h = harness();
        let batch = ChangeBatch::pending(vec![ChangeRecord::added(doc("a", 10))]);

        assert_eq!(h.processor.process(&batch).await.unwrap(), BatchOutcome::Skipped);
        assert!(h.seen.lock().is_empty());
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_aborts_batch() {
        let h = harness();
        let batch = ChangeBatch::new(vec![
            ChangeRecord::added(doc("a", 10)),
            ChangeRecord::added(Document::new("broken")),
            ChangeRecord::added(doc("c", 30)),
        ]);

        let err = h.processor.process(&batch).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MissingTimestamp { ref field, ref document } if field == "ts" && document == "broken"
        ));
        assert_eq!(h.seen.lock().len(), 1);
        assert_eq!(h.store.peek(), Some(Timestamp::from_seconds(10)));
    }

    #[tokio::test]
    async fn test_invalid_field_aborts_batch() {
        let h = harness();
        let batch = ChangeBatch::new(vec![ChangeRecord::added(
            Document::new("x").with_field("ts", "yesterday"),
        )]);

        let err = h.processor.process(&batch).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimestamp { .. }));
        assert!(h.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replay_does_not_move_watermark() {
        let h = harness();
        let batch = ChangeBatch::new(vec![
            ChangeRecord::added(doc("a", 10)),
            ChangeRecord::modified(doc("a", 20)),
        ]);

        h.processor.process(&batch).await.unwrap();
        let writes = h.store.write_count();
        h.processor.process(&batch).await.unwrap();

        assert_eq!(h.store.write_count(), writes);
        assert_eq!(h.store.get().await.unwrap(), Some(Timestamp::from_seconds(20)));
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_stop_batch() {
        let h = harness();
        h.processor
            .events
            .on(ObserverEvent::DocumentCreated, |_: &Document| Err("handler failed".into()));

        let batch = ChangeBatch::new(vec![
            ChangeRecord::added(doc("a", 10)),
            ChangeRecord::added(doc("b", 20)),
        ]);
        h.processor.process(&batch).await.unwrap();

        assert_eq!(h.seen.lock().len(), 2);
        assert_eq!(h.processor.events.failure_count(), 2);
        assert_eq!(h.store.peek(), Some(Timestamp::from_seconds(20)));
    }

    #[tokio::test]
    async fn test_run_reports_feed_errors_and_stops() {
        let h = harness();
        let errors = h.errors.clone();
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel();

        tx.send(Ok(ChangeBatch::new(vec![ChangeRecord::added(doc("a", 10))])))
            .await
            .unwrap();
        tx.send(Err(FeedError::Remote("quota exceeded".into()))).await.unwrap();
        tx.send(Err(FeedError::MissingSnapshot)).await.unwrap();
        drop(tx);

        h.processor.run(rx, stop_rx).await;

        assert_eq!(h.seen.lock().len(), 1);
        assert_eq!(
            *errors.lock(),
            vec![
                "change feed error: quota exceeded".to_string(),
                "no snapshot delivered by change feed".to_string(),
                "change feed error: change feed closed".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_stops_before_queued_batches() {
        let h = harness();
        let (tx, rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();

        tx.send(Ok(ChangeBatch::new(vec![ChangeRecord::added(doc("a", 10))])))
            .await
            .unwrap();
        stop_tx.send(()).unwrap();

        h.processor.run(rx, stop_rx).await;

        assert!(h.seen.lock().is_empty());
        assert!(h.errors.lock().is_empty());
        drop(tx);
    }
}
