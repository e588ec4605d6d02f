//! Bounded background queue in front of a slow sink
//!
//! Records are handed over with `try_send` so the forwarding path never
//! waits on storage. When the queue is full the record is dropped and
//! counted.

use audit_relay_core::QueryEvent;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::{AuditError, AuditSink};

/// Sink wrapper that writes through a background worker
pub struct QueuedSink {
    sender: Mutex<Option<mpsc::Sender<QueryEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
    name: String,
}

impl QueuedSink {
    /// Start a worker that drains a queue of `capacity` records into `inner`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(inner: Arc<dyn AuditSink>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<QueryEvent>(capacity.max(1));
        let name = inner.name().to_string();

        let worker = tokio::task::spawn_blocking(move || {
            while let Some(event) = receiver.blocking_recv() {
                if let Err(e) = inner.record(event) {
                    warn!("Failed to write audit record to {} sink: {}", inner.name(), e);
                }
            }
            debug!("Audit queue for {} sink drained", inner.name());
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
            name,
        }
    }

    /// Records dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting records and wait until the queued ones are written
    pub async fn close(&self) {
        let sender = self.sender.lock().ok().and_then(|mut s| s.take());
        drop(sender);

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Audit worker for {} sink failed: {}", self.name, e);
            }
        }
    }
}

impl AuditSink for QueuedSink {
    fn record(&self, event: QueryEvent) -> Result<(), AuditError> {
        let guard = self.sender.lock().map_err(|_| AuditError::Closed)?;
        let sender = guard.as_ref().ok_or(AuditError::Closed)?;

        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(AuditError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(AuditError::Closed),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
