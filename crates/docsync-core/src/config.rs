//! Observer configuration.

use docsync_proto::document::DEFAULT_DELETED_FIELD;
use docsync_proto::Timestamp;

/// Configuration for a [`ChangeObserver`](crate::ChangeObserver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverConfig {
    /// Document field holding the last-updated timestamp.
    pub last_updated_field: String,

    /// Document field holding the soft-delete flag.
    pub deleted_field: String,

    /// Watermark used when the store holds no value.
    pub initial_watermark: Timestamp,
}

impl ObserverConfig {
    /// Create a configuration watching the given last-updated field.
    pub fn new(last_updated_field: impl Into<String>) -> Self {
        Self {
            last_updated_field: last_updated_field.into(),
            deleted_field: DEFAULT_DELETED_FIELD.to_string(),
            initial_watermark: Timestamp::default_watermark(),
        }
    }

    /// Set the soft-delete flag field.
    pub fn with_deleted_field(mut self, field: impl Into<String>) -> Self {
        self.deleted_field = field.into();
        self
    }

    /// Set the watermark used when nothing has been persisted.
    pub fn with_initial_watermark(mut self, watermark: Timestamp) -> Self {
        self.initial_watermark = watermark;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObserverConfig::new("updatedAt");
        assert_eq!(config.last_updated_field, "updatedAt");
        assert_eq!(config.deleted_field, "isDeleted");
        assert_eq!(config.initial_watermark, Timestamp::default_watermark());
    }

    #[test]
    fn test_config_builder() {
        let config = ObserverConfig::new("modified")
            .with_deleted_field("archived")
            .with_initial_watermark(Timestamp::from_seconds(10));

        assert_eq!(config.last_updated_field, "modified");
        assert_eq!(config.deleted_field, "archived");
        assert_eq!(config.initial_watermark, Timestamp::from_seconds(10));
    }
}
