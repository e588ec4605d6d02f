//! Audit sinks
//!
//! The relay hands every classified client command to an [`AuditSink`].
//! Sinks are called synchronously on the forwarding path, so they must be
//! cheap; slow storage should be wrapped in a [`QueuedSink`] which moves the
//! write onto a background worker and drops records when it falls behind.

mod file;
mod log_sink;
mod queue;
mod sqlite;

pub use file::JsonLinesSink;
pub use log_sink::LogSink;
pub use queue::QueuedSink;
pub use sqlite::SqliteSink;

use audit_relay_core::QueryEvent;
use log::{info, warn};
use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AuditConfig, AuditSinkKind};
use crate::error::{to_config_error, Result};

/// Error type for audit sinks
#[derive(Debug, Error)]
pub enum AuditError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Background queue is full and the record was dropped
    #[error("Audit queue is full, record dropped")]
    QueueFull,

    /// Sink no longer accepts records
    #[error("Audit sink is closed")]
    Closed,
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    /// Record one query event
    fn record(&self, event: QueryEvent) -> std::result::Result<(), AuditError>;

    /// Short name used in log messages
    fn name(&self) -> &str;
}

/// The configured sink, plus the queue in front of it when there is one
pub struct AuditHandle {
    sink: Arc<dyn AuditSink>,
    queue: Option<Arc<QueuedSink>>,
}

impl AuditHandle {
    /// Sink to hand to the relay
    pub fn sink(&self) -> Arc<dyn AuditSink> {
        self.sink.clone()
    }

    /// Stop accepting records and write out any that are still queued
    pub async fn close(&self) {
        if let Some(queue) = &self.queue {
            queue.close().await;
            let dropped = queue.dropped();
            if dropped > 0 {
                warn!("{} audit records were dropped because the queue was full", dropped);
            }
        }
    }
}

/// Build the sink described by the audit configuration
///
/// Returns `None` when auditing is disabled. Queued sinks spawn their worker
/// on the current tokio runtime.
pub fn build_sink(config: &AuditConfig) -> Result<Option<AuditHandle>> {
    let sink: Arc<dyn AuditSink> = match config.sink {
        AuditSinkKind::None => return Ok(None),
        AuditSinkKind::Log => Arc::new(LogSink::new()),
        AuditSinkKind::Jsonl => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| to_config_error("jsonl audit sink requires a path"))?;
            Arc::new(JsonLinesSink::open(path)?)
        }
        AuditSinkKind::Sqlite => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| to_config_error("sqlite audit sink requires a path"))?;
            Arc::new(SqliteSink::open(path)?)
        }
    };

    let handle = match config.queue_capacity {
        Some(capacity) => {
            info!("Auditing to {} sink through a queue of {} records", sink.name(), capacity);
            let queue = Arc::new(QueuedSink::spawn(sink, capacity));
            AuditHandle {
                sink: queue.clone(),
                queue: Some(queue),
            }
        }
        None => {
            info!("Auditing to {} sink", sink.name());
            AuditHandle { sink, queue: None }
        }
    };

    Ok(Some(handle))
}
