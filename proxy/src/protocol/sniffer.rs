//! Inline classifier for the client to backend direction
//!
//! The sniffer looks at each chunk exactly as it was read from the client,
//! before it is forwarded. It never changes the bytes and never fails the
//! session: a chunk that does not classify is simply not audited, and a
//! sink error is only logged.

use audit_relay_core::{classify, CommandKind, QueryEvent, SessionEndpoints};
use log::{trace, warn};
use std::sync::Arc;

use crate::audit::AuditSink;

/// Per-session protocol sniffer
#[derive(Clone)]
pub struct Sniffer {
    /// Addresses stamped on every record
    endpoints: SessionEndpoints,

    /// Where records go, if auditing is enabled
    sink: Option<Arc<dyn AuditSink>>,

    /// Log every classified command
    verbose: bool,
}

impl Sniffer {
    /// Create a sniffer for one session
    pub fn new(
        endpoints: SessionEndpoints,
        sink: Option<Arc<dyn AuditSink>>,
        verbose: bool,
    ) -> Self {
        Self {
            endpoints,
            sink,
            verbose,
        }
    }

    /// Session addresses
    pub fn endpoints(&self) -> &SessionEndpoints {
        &self.endpoints
    }

    /// Inspect one client chunk and record it if it classifies
    ///
    /// Each call starts from scratch; nothing from an earlier chunk carries
    /// over.
    pub fn inspect(&self, chunk: &[u8]) -> Option<CommandKind> {
        let classification = classify(chunk)?;
        let kind = classification.kind;

        if self.verbose {
            trace!(
                "From {} To {}; {}",
                self.endpoints.client.ip(),
                self.endpoints.server.ip(),
                classification.verbose
            );
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(QueryEvent::new(&self.endpoints, classification)) {
                warn!("Failed to record {} command to {} sink: {}", kind, sink.name(), e);
            }
        }

        Some(kind)
    }
}

impl std::fmt::Debug for Sniffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sniffer")
            .field("endpoints", &self.endpoints)
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .field("verbose", &self.verbose)
            .finish()
    }
}
