//! Batch partitioning
//!
//! Picks the longest prefix of the buffer that fits in one put request.

use thiserror::Error;

use crate::config::{FlushConfig, MAX_REQUEST_BYTES, MAX_REQUEST_RECORDS};
use crate::record::LogRecord;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("record of {size} bytes can never fit the {limit} byte batch limit")]
pub struct RecordTooLarge {
    pub size: usize,
    pub limit: usize,
}

/// Upper bounds for a single batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_bytes: usize,
    pub max_records: usize,
}

impl BatchLimits {
    /// Limit by size only (record count capped at the service maximum)
    pub fn bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            max_records: MAX_REQUEST_RECORDS,
        }
    }

    /// Fail if `record` could never be sent, whatever else is in the batch
    pub fn check(&self, record: &LogRecord) -> Result<usize, RecordTooLarge> {
        let size = record.encoded_size();
        if size > self.max_bytes {
            return Err(RecordTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(size)
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::bytes(MAX_REQUEST_BYTES as usize)
    }
}

impl From<&FlushConfig> for BatchLimits {
    fn from(flush: &FlushConfig) -> Self {
        Self {
            max_bytes: flush.max_batch_bytes.as_usize(),
            max_records: flush.max_batch_records,
        }
    }
}

/// Number of leading records whose cumulative encoded size stays within the limits.
///
/// Returns 0 for empty input. A first record that alone exceeds
/// `max_bytes` is an error: it can never be sent and must not be dropped
/// silently.
pub fn partition<'a, I>(records: I, limits: &BatchLimits) -> Result<usize, RecordTooLarge>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    partition_sizes(records.into_iter().map(LogRecord::encoded_size), limits)
}

/// [`partition`] over sizes measured ahead of time
pub fn partition_sizes<I>(sizes: I, limits: &BatchLimits) -> Result<usize, RecordTooLarge>
where
    I: IntoIterator<Item = usize>,
{
    let mut total = 0usize;
    let mut count = 0usize;

    for size in sizes {
        if count == limits.max_records {
            break;
        }
        if count == 0 && size > limits.max_bytes {
            return Err(RecordTooLarge {
                size,
                limit: limits.max_bytes,
            });
        }
        total = total.saturating_add(size);
        if total > limits.max_bytes {
            break;
        }
        count += 1;
    }

    Ok(count)
}
