//! Shipper counters and tracing setup

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::layer::ShipperLayer;
use crate::shipper::LogShipper;

/// Counters updated by the shipper as records move through it
#[derive(Debug, Default)]
pub struct Metrics {
    records_submitted: AtomicU64,
    records_rejected: AtomicU64,
    records_written: AtomicU64,
    batches_written: AtomicU64,
    bytes_written: AtomicU64,
    flush_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.records_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_written(&self, records: usize, bytes: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(records as u64, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        tracing::debug!(counter = "batches_written", records, bytes, "Metric incremented");
    }

    pub(crate) fn flush_failed(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "flush_failures", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_submitted: self.records_submitted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_submitted: u64,
    pub records_rejected: u64,
    pub records_written: u64,
    pub batches_written: u64,
    pub bytes_written: u64,
    pub flush_failures: u64,
}

/// Install a global subscriber that prints locally and ships every event.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(shipper: Arc<LogShipper>) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ShipperLayer::new(shipper))
        .try_init()
}
