//! Log records and write tokens
//!
//! A [`LogRecord`] is the unit the shipper buffers and sends. Its serde shape
//! (`{"message": ..., "timestamp": ...}`) is the wire shape of a single event
//! in a put request, so the serialized length doubles as the size estimate
//! used by the partitioner.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Separator byte counted per record when it is framed inside a JSON array.
const FRAMING_BYTES: usize = 1;

/// A single buffered log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl LogRecord {
    pub fn new(message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            message: message.into(),
            timestamp,
        }
    }

    /// Record stamped with the current wall-clock time
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(message, now_millis())
    }

    /// Wrap any serializable entry into a record whose message is the entry's JSON
    pub fn from_entry<T: Serialize + ?Sized>(entry: &T) -> serde_json::Result<Self> {
        Ok(Self::now(serde_json::to_string(entry)?))
    }

    /// Conservative estimate of the bytes this record adds to a put request.
    ///
    /// Always larger than the service's own `utf8(message) + 26` accounting:
    /// the JSON object alone carries 26 bytes of keys and punctuation before
    /// the timestamp digits, and escaping only grows the message.
    pub fn encoded_size(&self) -> usize {
        // Serializing a struct of String and i64 cannot fail.
        let json_len = serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX);
        json_len.saturating_add(FRAMING_BYTES)
    }
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Opaque, server-issued token naming the next accepted write position of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteToken(String);

impl WriteToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
