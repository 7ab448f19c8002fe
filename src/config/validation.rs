use super::models::{MAX_REQUEST_BYTES, MAX_REQUEST_RECORDS, ShipperConfig};
use thiserror::Error;

/// Retention periods (in days) the log service accepts
pub const RETENTION_DAYS_ALLOWED: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required value: {field}")]
    MissingField { field: &'static str },

    #[error("Retention of {days} days is not supported by the log service")]
    UnsupportedRetention { days: u32 },

    #[error("Flush interval must be positive")]
    ZeroFlushInterval,

    #[error("max_batch_bytes must be between 1 and {limit} bytes, got {actual}")]
    BatchBytesOutOfRange { actual: u64, limit: u64 },

    #[error("max_batch_records must be between 1 and {limit}, got {actual}")]
    BatchRecordsOutOfRange { actual: usize, limit: usize },

    #[error("Invalid endpoint '{endpoint}', expected an http:// or https:// URL")]
    InvalidEndpoint { endpoint: String },
}

/// Validate the entire configuration
pub fn validate(config: &ShipperConfig) -> Result<(), ValidationError> {
    validate_stream(config)?;
    validate_flush(config)?;
    validate_transport(config)?;
    Ok(())
}

fn validate_stream(config: &ShipperConfig) -> Result<(), ValidationError> {
    if config.stream.group_name.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: "stream.group_name",
        });
    }
    if config.stream.stream_name.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: "stream.stream_name",
        });
    }
    if !RETENTION_DAYS_ALLOWED.contains(&config.stream.retention_days) {
        return Err(ValidationError::UnsupportedRetention {
            days: config.stream.retention_days,
        });
    }
    Ok(())
}

fn validate_flush(config: &ShipperConfig) -> Result<(), ValidationError> {
    let flush = &config.flush;

    if flush.interval_ms == 0 {
        return Err(ValidationError::ZeroFlushInterval);
    }

    let bytes = flush.max_batch_bytes.as_u64();
    if bytes == 0 || bytes > MAX_REQUEST_BYTES {
        return Err(ValidationError::BatchBytesOutOfRange {
            actual: bytes,
            limit: MAX_REQUEST_BYTES,
        });
    }

    if flush.max_batch_records == 0 || flush.max_batch_records > MAX_REQUEST_RECORDS {
        return Err(ValidationError::BatchRecordsOutOfRange {
            actual: flush.max_batch_records,
            limit: MAX_REQUEST_RECORDS,
        });
    }

    Ok(())
}

fn validate_transport(config: &ShipperConfig) -> Result<(), ValidationError> {
    if let Some(endpoint) = &config.transport.endpoint {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ValidationError::InvalidEndpoint {
                endpoint: endpoint.clone(),
            });
        }
    }
    Ok(())
}
