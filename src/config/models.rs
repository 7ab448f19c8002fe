use bon::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::humanize::ByteSize;

/// Largest put request the log service accepts
pub const MAX_REQUEST_BYTES: u64 = 1_048_576;
/// Largest number of events the log service accepts in one put
pub const MAX_REQUEST_RECORDS: usize = 10_000;
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Builder)]
pub struct ShipperConfig {
    #[serde(default)]
    pub stream: StreamIdentity,
    #[serde(default)]
    #[builder(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    #[builder(default)]
    pub transport: TransportConfig,
}

/// Destination of the shipped records, fixed for the shipper's lifetime
///
/// Group and stream names default to empty so that a missing value is
/// reported by validation rather than as a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Builder)]
pub struct StreamIdentity {
    #[serde(default)]
    #[builder(into)]
    pub group_name: String,
    #[serde(default)]
    #[builder(into)]
    pub stream_name: String,
    #[serde(default = "default_retention_days")]
    #[builder(default = DEFAULT_RETENTION_DAYS)]
    pub retention_days: u32,
}

impl Default for StreamIdentity {
    fn default() -> Self {
        Self {
            group_name: String::new(),
            stream_name: String::new(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

/// Flush cadence and batch limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlushConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: ByteSize,
    #[serde(default = "default_max_batch_records")]
    pub max_batch_records: usize,
}

impl FlushConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_batch_bytes: default_max_batch_bytes(),
            max_batch_records: default_max_batch_records(),
        }
    }
}

fn default_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_max_batch_bytes() -> ByteSize {
    ByteSize(MAX_REQUEST_BYTES)
}

fn default_max_batch_records() -> usize {
    MAX_REQUEST_RECORDS
}

/// Connection settings for the remote service, passed through to the client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Base URL of the log service (required for the HTTP client)
    pub endpoint: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts per write before a transient failure is reported
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShipperConfig::builder()
            .stream(StreamIdentity::builder().group_name("app").stream_name("web-1").build())
            .build();

        assert_eq!(config.stream.retention_days, 7);
        assert_eq!(config.flush.interval(), Duration::from_secs(1));
        assert_eq!(config.flush.max_batch_bytes.as_u64(), 1_048_576);
        assert_eq!(config.flush.max_batch_records, 10_000);
        assert_eq!(config.transport.max_retries, 3);
        assert!(config.transport.endpoint.is_none());
    }

    #[test]
    fn test_missing_names_deserialize_empty() {
        let identity: StreamIdentity = serde_json::from_str("{}").unwrap();
        assert!(identity.group_name.is_empty());
        assert_eq!(identity.retention_days, 7);
    }
}
