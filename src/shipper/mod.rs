//! Buffered, batched shipping of log records to a remote log stream
//!
//! [`LogShipper`] is the public entry point. It owns the record buffer and
//! the lifecycle, and coordinates the pieces that do the work:
//!
//! - [`initializer`]: makes sure the group and stream exist and finds the first token
//! - [`partition`]: picks how much of the buffer fits in one request
//! - [`writer`]: sends a batch with the current token and adopts the next one
//! - `flush`: background task running one drain cycle per interval
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted --start()--> Starting --setup ok--> Started --flush_and_stop()--> Stopped
//!                            |                                                   ^
//!                            +-------------------setup failed--------------------+
//! ```
//!
//! Records are accepted while `Starting` or `Started`. Every drain (flush
//! tick, manual [`LogShipper::flush`], final drain) holds the writer lock for
//! its whole cycle, so at most one put is in flight per stream. A batch is
//! copied out of the buffer and removed only after the service acknowledges
//! it; records appended meanwhile sit behind it untouched.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use logship::{LogRecord, LogShipper, ShipperConfig};
//!
//! let config = ShipperConfig::load()?;
//! let shipper = LogShipper::connect(&config)?;
//! shipper.start().await?;
//! shipper.submit(LogRecord::now("service up"))?;
//! shipper.flush_and_stop().await?;
//! ```

mod flush;
pub mod initializer;
pub mod partition;
pub mod writer;

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use self::flush::FlushLoop;
use self::partition::{BatchLimits, partition_sizes};
use self::writer::{RetryPolicy, SequencedWriter};
use crate::config::{ShipperConfig, StreamIdentity, ValidationError};
use crate::error::{Result, ShipperError};
use crate::observability::{Metrics, MetricsSnapshot};
use crate::record::LogRecord;
use crate::service::{HttpLogService, LogStreamService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Started,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::NotStarted => "not started",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
        })
    }
}

/// A buffered record with its encoded size, measured once at submit
struct Pending {
    record: LogRecord,
    size: usize,
}

/// State shared between the public handle and the flush task
pub(crate) struct Inner {
    identity: StreamIdentity,
    service: Arc<dyn LogStreamService>,
    limits: BatchLimits,
    retry: RetryPolicy,
    state: watch::Sender<LifecycleState>,
    buffer: Mutex<VecDeque<Pending>>,
    /// `None` until setup completes
    writer: tokio::sync::Mutex<Option<SequencedWriter>>,
    metrics: Metrics,
    last_error: Mutex<Option<String>>,
}

impl Inner {
    fn buffer(&self) -> MutexGuard<'_, VecDeque<Pending>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub(crate) fn pending(&self) -> usize {
        self.buffer().len()
    }

    pub(crate) fn record_failure(&self, err: &ShipperError) {
        self.metrics.flush_failed();
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
    }

    /// One partition + write cycle. Returns the number of records delivered.
    pub(crate) async fn drain_once(&self) -> Result<usize> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(0);
        };
        if self.state() != LifecycleState::Started {
            return Ok(0);
        }

        let (batch, bytes) = {
            let buffer = self.buffer();
            let count = partition_sizes(buffer.iter().map(|p| p.size), &self.limits)?;
            let head = buffer.iter().take(count);
            let bytes: usize = head.clone().map(|p| p.size).sum();
            (head.map(|p| p.record.clone()).collect::<Vec<_>>(), bytes)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        writer.write(&batch).await?;

        // Only this cycle removes from the head, and it holds the writer lock.
        self.buffer().drain(..batch.len());
        self.metrics.batch_written(batch.len(), bytes);
        Ok(batch.len())
    }

    /// Drain until the buffer is empty, then move to `Stopped`.
    ///
    /// The final emptiness check and the transition share the buffer lock,
    /// so a concurrent submit either lands in a drained batch or is refused.
    async fn drain_all(&self) -> Result<()> {
        loop {
            let sent = match self.drain_once().await {
                Ok(sent) => sent,
                Err(e) => {
                    self.record_failure(&e);
                    self.state.send_replace(LifecycleState::Stopped);
                    return Err(e);
                }
            };

            let buffer = self.buffer();
            if buffer.is_empty() || sent == 0 {
                if !buffer.is_empty() {
                    warn!(pending = buffer.len(), "Stopping with undelivered records");
                }
                self.state.send_replace(LifecycleState::Stopped);
                return Ok(());
            }
        }
    }
}

/// Buffers log records and ships them to one remote log stream
pub struct LogShipper {
    inner: Arc<Inner>,
    interval: Duration,
    flush_loop: Mutex<Option<FlushLoop>>,
}

impl LogShipper {
    /// Create a shipper writing through `service`
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration fails validation, e.g. when
    /// the group or stream name is missing.
    pub fn new(config: &ShipperConfig, service: Arc<dyn LogStreamService>) -> Result<Self> {
        config.validate()?;

        let inner = Inner {
            identity: config.stream.clone(),
            service,
            limits: BatchLimits::from(&config.flush),
            retry: RetryPolicy::from(&config.transport),
            state: watch::Sender::new(LifecycleState::NotStarted),
            buffer: Mutex::new(VecDeque::new()),
            writer: tokio::sync::Mutex::new(None),
            metrics: Metrics::new(),
            last_error: Mutex::new(None),
        };

        Ok(Self {
            inner: Arc::new(inner),
            interval: config.flush.interval(),
            flush_loop: Mutex::new(None),
        })
    }

    /// Create a shipper talking HTTP to `transport.endpoint`
    pub fn connect(config: &ShipperConfig) -> Result<Self> {
        config.validate()?;
        if config.transport.endpoint.is_none() {
            return Err(ValidationError::MissingField {
                field: "transport.endpoint",
            }
            .into());
        }
        let service = HttpLogService::new(&config.transport).map_err(ShipperError::Transport)?;
        Self::new(config, Arc::new(service))
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.inner.identity
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// Records buffered and not yet acknowledged by the service
    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Most recent drain failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn flush_loop_slot(&self) -> MutexGuard<'_, Option<FlushLoop>> {
        self.flush_loop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set up the destination stream and begin periodic flushing.
    ///
    /// Must run inside a Tokio runtime. May be called once; a second call
    /// fails with `AlreadyStarted` without touching the service. If setup
    /// fails the shipper moves to `Stopped` and never accepts records again.
    pub async fn start(&self) -> Result<()> {
        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == LifecycleState::NotStarted {
                *state = LifecycleState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            error!(state = %self.state(), "start called more than once");
            return Err(ShipperError::AlreadyStarted);
        }

        let identity = &self.inner.identity;
        let token = match initializer::initialize(self.inner.service.as_ref(), identity).await {
            Ok(token) => token,
            Err(e) => {
                error!(group = %identity.group_name, stream = %identity.stream_name, error = %e, "Log shipper failed to start");
                let discarded = {
                    let mut buffer = self.inner.buffer();
                    let discarded = buffer.len();
                    buffer.clear();
                    self.inner.state.send_replace(LifecycleState::Stopped);
                    discarded
                };
                if discarded > 0 {
                    warn!(discarded, "Discarded records buffered during failed start");
                }
                return Err(e);
            }
        };

        *self.inner.writer.lock().await = Some(SequencedWriter::new(
            self.inner.service.clone(),
            identity.clone(),
            token,
            self.inner.retry,
        ));

        // Register the loop before announcing Started so flush_and_stop can always stop it.
        *self.flush_loop_slot() = Some(FlushLoop::spawn(self.inner.clone(), self.interval));
        self.inner.state.send_replace(LifecycleState::Started);

        info!(
            group = %identity.group_name,
            stream = %identity.stream_name,
            interval_ms = self.interval.as_millis() as u64,
            "Log shipper started"
        );
        Ok(())
    }

    /// Append a record to the buffer. Never blocks on I/O.
    ///
    /// # Errors
    ///
    /// - `NotStarted` before [`start`](Self::start) has been called
    /// - `Stopped` after [`flush_and_stop`](Self::flush_and_stop) or a failed start
    /// - `RecordTooLarge` if the record alone exceeds the batch size limit
    pub fn submit(&self, record: LogRecord) -> Result<()> {
        // Measured before taking the lock; drains reuse the size.
        let checked = self.inner.limits.check(&record);

        let outcome = {
            let mut buffer = self.inner.buffer();
            match (self.inner.state(), checked) {
                (LifecycleState::NotStarted, _) => Err(ShipperError::NotStarted),
                (LifecycleState::Stopped, _) => Err(ShipperError::Stopped),
                (_, Err(too_large)) => Err(too_large.into()),
                (_, Ok(size)) => {
                    buffer.push_back(Pending { record, size });
                    Ok(())
                }
            }
        };

        match &outcome {
            Ok(()) => self.inner.metrics.record_submitted(),
            Err(e) => {
                self.inner.metrics.record_rejected();
                if let ShipperError::RecordTooLarge { size, limit } = e {
                    warn!(size, limit, "Rejected oversized log record");
                }
            }
        }
        outcome
    }

    /// Submit any serializable entry, its JSON becoming the record's message
    pub fn submit_entry<T: Serialize + ?Sized>(&self, entry: &T) -> Result<()> {
        self.submit(LogRecord::from_entry(entry)?)
    }

    /// Run one drain cycle now instead of waiting for the next tick
    pub async fn flush(&self) -> Result<usize> {
        self.inner
            .drain_once()
            .await
            .inspect_err(|e| self.inner.record_failure(e))
    }

    /// Wait for a start in progress, stop the flush loop, send everything
    /// still buffered, and move to `Stopped`.
    ///
    /// Calling it before `start` just marks the shipper stopped; calling it
    /// again after it completed is a no-op. If a write fails the shipper
    /// still ends `Stopped`, the undelivered records stay counted in
    /// [`pending`](Self::pending), and the error is returned.
    pub async fn flush_and_stop(&self) -> Result<()> {
        let mut state_rx = self.inner.state.subscribe();
        let state = state_rx
            .wait_for(|state| *state != LifecycleState::Starting)
            .await
            .map(|state| *state)
            .unwrap_or(LifecycleState::Stopped);

        match state {
            LifecycleState::NotStarted => {
                self.inner.state.send_replace(LifecycleState::Stopped);
                info!("Log shipper stopped before it was started");
                return Ok(());
            }
            LifecycleState::Stopped => {
                debug!("Log shipper already stopped");
                return Ok(());
            }
            LifecycleState::Starting | LifecycleState::Started => {}
        }

        let flush_loop = self.flush_loop_slot().take();
        if let Some(flush_loop) = flush_loop {
            flush_loop.stop().await;
        }

        let pending = self.pending();
        match self.inner.drain_all().await {
            Ok(()) => {
                info!(drained = pending, "Log shipper flushed and stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, undelivered = self.pending(), "Final flush failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogShipper")
            .field("identity", &self.inner.identity)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}
