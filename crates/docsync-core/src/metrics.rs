//! Observer counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observer::ObserverEvent;

/// Counters describing an observer's activity.
///
/// Shared between the observer handle and its batch loop.
#[derive(Debug, Default)]
pub struct ObserverMetrics {
    // Batch metrics
    batches_processed: AtomicU64,
    batches_skipped: AtomicU64,
    batch_errors: AtomicU64,

    // Record metrics
    records_processed: AtomicU64,
    watermark_advances: AtomicU64,

    // Emission metrics
    created_emitted: AtomicU64,
    updated_emitted: AtomicU64,
    removed_emitted: AtomicU64,
}

/// Point-in-time copy of [`ObserverMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Batches fully processed.
    pub batches_processed: u64,
    /// Batches ignored because they carried pending local writes.
    pub batches_skipped: u64,
    /// Batches aborted by an error, plus feed errors.
    pub batch_errors: u64,
    /// Records whose watermark was handled.
    pub records_processed: u64,
    /// Records that moved the watermark forward.
    pub watermark_advances: u64,
    /// `DOCUMENT_CREATED` emissions.
    pub created_emitted: u64,
    /// `DOCUMENT_UPDATED` emissions.
    pub updated_emitted: u64,
    /// `DOCUMENT_REMOVED` emissions.
    pub removed_emitted: u64,
    /// Listener invocations that errored or panicked.
    pub listener_failures: u64,
}

impl ObserverMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fully processed batch.
    pub fn record_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch skipped for pending writes.
    pub fn record_skipped_batch(&self) {
        self.batches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed batch or feed error.
    pub fn record_batch_error(&self) {
        self.batch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processed record and whether it advanced the watermark.
    pub fn record_record(&self, advanced: bool) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
        if advanced {
            self.watermark_advances.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an emitted event.
    pub fn record_emit(&self, event: ObserverEvent) {
        let counter = match event {
            ObserverEvent::DocumentCreated => &self.created_emitted,
            ObserverEvent::DocumentUpdated => &self.updated_emitted,
            ObserverEvent::DocumentRemoved => &self.removed_emitted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    ///
    /// `listener_failures` is filled in by the observer, which owns the
    /// notifiers.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            batches_skipped: self.batches_skipped.load(Ordering::Relaxed),
            batch_errors: self.batch_errors.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
            watermark_advances: self.watermark_advances.load(Ordering::Relaxed),
            created_emitted: self.created_emitted.load(Ordering::Relaxed),
            updated_emitted: self.updated_emitted.load(Ordering::Relaxed),
            removed_emitted: self.removed_emitted.load(Ordering::Relaxed),
            listener_failures: 0,
        }
    }
}

/// Shared metrics handle.
pub type SharedObserverMetrics = Arc<ObserverMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ObserverMetrics::new();

        metrics.record_batch();
        metrics.record_skipped_batch();
        metrics.record_batch_error();
        metrics.record_record(true);
        metrics.record_record(false);
        metrics.record_emit(ObserverEvent::DocumentCreated);
        metrics.record_emit(ObserverEvent::DocumentRemoved);
        metrics.record_emit(ObserverEvent::DocumentRemoved);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_processed, 1);
        assert_eq!(snapshot.batches_skipped, 1);
        assert_eq!(snapshot.batch_errors, 1);
        assert_eq!(snapshot.records_processed, 2);
        assert_eq!(snapshot.watermark_advances, 1);
        assert_eq!(snapshot.created_emitted, 1);
        assert_eq!(snapshot.updated_emitted, 0);
        assert_eq!(snapshot.removed_emitted, 2);
    }
}
