//! Audit sink that writes records to the log

use audit_relay_core::QueryEvent;
use log::info;

use super::{AuditError, AuditSink};

/// Log target used for audit records
pub const AUDIT_TARGET: &str = "audit";

/// Writes each record as one line on the `audit` log target
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    /// Create a new log sink
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for LogSink {
    fn record(&self, event: QueryEvent) -> Result<(), AuditError> {
        info!(
            target: AUDIT_TARGET,
            "{}:{} -> {}:{} [:{}] {}: {}",
            event.client_ip,
            event.client_port,
            event.server_ip,
            event.server_port,
            event.bind_port,
            event.command,
            event.sql
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
