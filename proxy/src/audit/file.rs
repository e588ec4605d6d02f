//! JSON Lines audit sink

use audit_relay_core::QueryEvent;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{AuditError, AuditSink};

/// Appends one JSON object per record to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonLinesSink {
    /// Open (or create) the file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Audit log file opened: {}", path.display());
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Path of the audit file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesSink {
    fn record(&self, event: QueryEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = self.file.lock().map_err(|_| AuditError::Closed)?;
        // One write per line keeps concurrent records from interleaving
        file.write_all(&line)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_relay_core::{classify, CommandKind, SessionEndpoints};

    fn event(packet: &[u8]) -> QueryEvent {
        let endpoints = SessionEndpoints {
            client: "127.0.0.1:40000".parse().unwrap(),
            server: "127.0.0.1:3306".parse().unwrap(),
            bind_port: 8002,
        };
        QueryEvent::new(&endpoints, classify(packet).unwrap())
    }

    #[test]
    fn test_records_are_appended_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.jsonl");

        let sink = JsonLinesSink::open(&path).unwrap();
        sink.record(event(b"\x09\x00\x00\x00\x03SELECT 1")).unwrap();
        sink.record(event(b"\x01\x00\x00\x00\x01")).unwrap();
        drop(sink);

        // Reopening appends rather than truncating
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.record(event(b"\x06\x00\x00\x00\x02sales")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let events: Vec<QueryEvent> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].command, CommandKind::Query);
        assert_eq!(events[0].sql, "SELECT 1");
        assert_eq!(events[1].sql, "user quit");
        assert_eq!(events[2].command, CommandKind::InitDb);
    }
}
