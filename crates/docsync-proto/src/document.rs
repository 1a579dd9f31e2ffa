//! Document payloads carried by change records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::timestamp::Timestamp;

/// Default name of the soft-delete flag field.
pub const DEFAULT_DELETED_FIELD: &str = "isDeleted";

/// A document snapshot: its identifier plus its field data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier within its collection.
    pub id: String,
    /// Field data.
    #[serde(default)]
    pub data: Map<String, JsonValue>,
}

impl Document {
    /// Create an empty document.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Map::new(),
        }
    }

    /// Create a document from a JSON object.
    ///
    /// Non-object values are rejected.
    pub fn from_json(id: impl Into<String>, data: JsonValue) -> Result<Self, Error> {
        match data {
            JsonValue::Object(data) => Ok(Self {
                id: id.into(),
                data,
            }),
            other => Err(Error::Deserialization(format!(
                "document data must be an object, got {}",
                other
            ))),
        }
    }

    /// Set a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    /// Set a timestamp field.
    pub fn with_timestamp(self, name: impl Into<String>, timestamp: Timestamp) -> Self {
        self.with_field(name, timestamp.to_json())
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.data.get(name)
    }

    /// Read a timestamp field.
    ///
    /// Returns [`Error::MissingField`] when the field is absent or null.
    pub fn timestamp(&self, name: &str) -> Result<Timestamp, Error> {
        match self.data.get(name) {
            None | Some(JsonValue::Null) => Err(Error::MissingField(name.to_string())),
            Some(value) => Timestamp::from_json(value),
        }
    }

    /// Whether the soft-delete flag stored in `flag_field` is set.
    ///
    /// Only a JSON `true` counts as deleted.
    pub fn is_deleted(&self, flag_field: &str) -> bool {
        matches!(self.data.get(flag_field), Some(JsonValue::Bool(true)))
    }
}
