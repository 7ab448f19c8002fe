//! Sequenced writes
//!
//! The writer owns the stream's current token. Each put carries it, and the
//! token returned by an accepted put replaces it before anything else can be
//! written. A service that has stopped issuing tokens leaves the held one
//! (possibly none) in place. Taking `&mut self` for the whole write keeps puts to the stream
//! strictly one at a time.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::initializer::lookup_token;
use crate::config::{StreamIdentity, TransportConfig};
use crate::error::{Result, ShipperError};
use crate::record::{LogRecord, WriteToken};
use crate::service::{LogStreamService, ServiceError};

/// Bounded exponential backoff for transient service failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for RetryPolicy {
    fn from(transport: &TransportConfig) -> Self {
        Self {
            max_attempts: transport.max_retries.max(1),
            base_backoff: Duration::from_millis(transport.retry_backoff_ms),
        }
    }
}

pub struct SequencedWriter {
    service: Arc<dyn LogStreamService>,
    identity: StreamIdentity,
    token: Option<WriteToken>,
    retry: RetryPolicy,
}

impl SequencedWriter {
    pub fn new(
        service: Arc<dyn LogStreamService>,
        identity: StreamIdentity,
        token: Option<WriteToken>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            identity,
            token,
            retry,
        }
    }

    /// Token the next write will carry
    pub fn token(&self) -> Option<&WriteToken> {
        self.token.as_ref()
    }

    /// Put `batch` with the held token and adopt the token the service returns.
    ///
    /// A sequence conflict is retried once with the token the service
    /// expects; a second conflict is returned as `WriteRejected`. Transient
    /// failures are retried per the retry policy, then returned as
    /// `Transport`. On any error the held token is left pointing at the
    /// stream's last known position.
    pub async fn write(&mut self, batch: &[LogRecord]) -> Result<Option<&WriteToken>> {
        let group = self.identity.group_name.as_str();
        let stream = self.identity.stream_name.as_str();
        let mut attempts = 0u32;
        let mut resynced = false;

        loop {
            attempts += 1;

            let result = self
                .service
                .put_records(group, stream, batch, self.token.as_ref())
                .await;

            match result {
                Ok(outcome) => {
                    debug!(group, stream, records = batch.len(), attempts, "Batch written");
                    if let Some(next) = outcome.next_token {
                        self.token = Some(next);
                    }
                    return Ok(self.token.as_ref());
                }
                Err(ServiceError::AlreadyAccepted { expected: Some(next) }) => {
                    // An earlier attempt landed; sending again would duplicate it.
                    warn!(group, stream, records = batch.len(), "Batch was already accepted");
                    self.token = Some(next);
                    return Ok(self.token.as_ref());
                }
                Err(err @ ServiceError::SequenceConflict { .. }) if !resynced => {
                    resynced = true;
                    warn!(group, stream, held = ?self.token, error = %err, "Sequence conflict, resyncing token");
                    self.token = Some(match err {
                        ServiceError::SequenceConflict { expected: Some(expected) } => expected,
                        _ => self.refresh_token(err).await?,
                    });
                }
                Err(err @ (ServiceError::SequenceConflict { .. } | ServiceError::AlreadyAccepted { .. })) => {
                    return Err(ShipperError::WriteRejected(err));
                }
                Err(err) if err.is_retryable() && attempts < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempts);
                    warn!(group, stream, attempts, error = %err, ?delay, "Write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    warn!(group, stream, attempts, error = %err, "Write failed after retries");
                    return Err(ShipperError::Transport(err));
                }
                Err(err) => return Err(ShipperError::WriteRejected(err)),
            }
        }
    }

    /// Read the stream's token back from the service after a conflict that
    /// did not say which token it expected
    async fn refresh_token(&self, conflict: ServiceError) -> Result<WriteToken> {
        match lookup_token(self.service.as_ref(), &self.identity).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(ShipperError::WriteRejected(conflict)),
            Err(e) if e.is_retryable() => Err(ShipperError::Transport(e)),
            Err(e) => Err(ShipperError::WriteRejected(e)),
        }
    }
}
