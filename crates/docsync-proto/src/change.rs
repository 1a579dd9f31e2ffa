//! Change records, batches and the watermark filter.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Error;
use crate::timestamp::Timestamp;

/// The kind of mutation reported by a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The document entered the result set.
    Added,
    /// A document already in the result set changed.
    Modified,
    /// The document left the result set.
    Removed,
}

impl ChangeKind {
    /// Wire name of the change kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// What the feed reported.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// The document as of this change.
    #[serde(alias = "doc")]
    pub document: Document,
}

impl ChangeRecord {
    /// Create a change record.
    pub fn new(kind: ChangeKind, document: Document) -> Self {
        Self { kind, document }
    }

    /// A record for a document entering the result set.
    pub fn added(document: Document) -> Self {
        Self::new(ChangeKind::Added, document)
    }

    /// A record for a document that changed.
    pub fn modified(document: Document) -> Self {
        Self::new(ChangeKind::Modified, document)
    }

    /// A record for a document leaving the result set.
    pub fn removed(document: Document) -> Self {
        Self::new(ChangeKind::Removed, document)
    }
}

/// One delivery unit from a change feed.
///
/// Records are in commit order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// The changes in this delivery.
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
    /// Set when the batch reflects local writes not yet confirmed by the backend.
    #[serde(default, rename = "hasPendingWrites")]
    pub has_pending_writes: bool,
}

impl ChangeBatch {
    /// Create a committed batch.
    pub fn new(changes: Vec<ChangeRecord>) -> Self {
        Self {
            changes,
            has_pending_writes: false,
        }
    }

    /// Create a batch of unconfirmed local writes.
    pub fn pending(changes: Vec<ChangeRecord>) -> Self {
        Self {
            changes,
            has_pending_writes: true,
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the batch carries no records.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Subscription predicate: documents whose `field` is strictly after `after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkFilter {
    /// Name of the last-updated field.
    pub field: String,
    /// Exclusive lower bound.
    pub after: Timestamp,
}

impl WatermarkFilter {
    /// Create a filter.
    pub fn new(field: impl Into<String>, after: Timestamp) -> Self {
        Self {
            field: field.into(),
            after,
        }
    }

    /// Test a document against the filter.
    ///
    /// Fails when the document has no readable timestamp in `field`.
    pub fn matches(&self, document: &Document) -> Result<bool, Error> {
        Ok(document.timestamp(&self.field)? > self.after)
    }
}

impl fmt::Display for WatermarkFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} > {}", self.field, self.after)
    }
}
