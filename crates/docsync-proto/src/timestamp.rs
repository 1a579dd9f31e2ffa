//! Logical timestamps used as sync watermarks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// Seconds since the Unix epoch of 1990-02-01T00:00:00Z, the default watermark.
pub const DEFAULT_WATERMARK_SECONDS: i64 = 633_830_400;

/// A point in time with nanosecond precision.
///
/// Ordering is total: first by `seconds`, then by `nanoseconds`. The serialized
/// form is `{"seconds": <i64>, "nanoseconds": <u32>}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "RawTimestamp")]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch.
    pub seconds: i64,
    /// Sub-second component, always below one billion.
    pub nanoseconds: u32,
}

/// Unvalidated wire form of [`Timestamp`].
#[derive(Deserialize)]
struct RawTimestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl TryFrom<RawTimestamp> for Timestamp {
    type Error = Error;

    fn try_from(raw: RawTimestamp) -> Result<Self, Error> {
        Timestamp::new(raw.seconds, raw.nanoseconds)
    }
}

impl Timestamp {
    /// Create a timestamp, validating the sub-second component.
    pub fn new(seconds: i64, nanoseconds: u32) -> Result<Self, Error> {
        if nanoseconds >= NANOS_PER_SECOND {
            return Err(Error::InvalidTimestamp(format!(
                "nanoseconds out of range: {}",
                nanoseconds
            )));
        }
        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    /// Create a timestamp from whole seconds.
    pub const fn from_seconds(seconds: i64) -> Self {
        Self {
            seconds,
            nanoseconds: 0,
        }
    }

    /// The watermark used when nothing has been persisted yet.
    pub const fn default_watermark() -> Self {
        Self::from_seconds(DEFAULT_WATERMARK_SECONDS)
    }

    /// Interpret a JSON document field as a timestamp.
    ///
    /// Accepts `{"seconds", "nanoseconds"}` objects as well as the
    /// `{"_seconds", "_nanoseconds"}` shape produced by SDK JSON exports.
    /// A missing sub-second component reads as zero.
    pub fn from_json(value: &JsonValue) -> Result<Self, Error> {
        let object = value.as_object().ok_or_else(|| {
            Error::InvalidTimestamp(format!("expected an object, got {}", value))
        })?;

        let seconds = object
            .get("seconds")
            .or_else(|| object.get("_seconds"))
            .ok_or_else(|| Error::MissingField("seconds".to_string()))?;
        let seconds = seconds.as_i64().ok_or_else(|| {
            Error::InvalidTimestamp(format!("seconds is not an integer: {}", seconds))
        })?;

        let nanoseconds = match object
            .get("nanoseconds")
            .or_else(|| object.get("_nanoseconds"))
        {
            None | Some(JsonValue::Null) => 0,
            Some(raw) => raw
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    Error::InvalidTimestamp(format!("nanoseconds is not a valid count: {}", raw))
                })?,
        };

        Self::new(seconds, nanoseconds)
    }

    /// Encode as the JSON object stored by key/value watermark stores.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "seconds": self.seconds,
            "nanoseconds": self.nanoseconds,
        })
    }

    /// Convert to a UTC date-time, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::default_watermark()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanoseconds: value.timestamp_subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}.{:09}", self.seconds, self.nanoseconds),
        }
    }
}
