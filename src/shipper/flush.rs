//! Recurring flush task
//!
//! One drain cycle per interval. The next tick is scheduled after the
//! previous one finishes, whatever its outcome, so the loop never stops on
//! its own; it ends only when its handle is stopped or dropped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Inner;

pub(crate) struct FlushLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushLoop {
    pub(crate) fn spawn(inner: Arc<Inner>, interval: Duration) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(run(inner, interval, rx));
        Self { shutdown, handle }
    }

    /// Stop scheduling ticks and wait for a tick in progress to finish
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Flush loop ended abnormally");
        }
    }
}

async fn run(inner: Arc<Inner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!(?interval, "Flush loop running");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // Fires on stop and when the owning shipper is dropped
            _ = shutdown.changed() => break,
        }

        match inner.drain_once().await {
            Ok(0) => {}
            Ok(sent) => debug!(sent, pending = inner.pending(), "Flush tick complete"),
            Err(e) => {
                error!(error = %e, pending = inner.pending(), "Flush tick failed, records kept for the next tick");
                inner.record_failure(&e);
            }
        }
    }

    debug!("Flush loop stopped");
}
