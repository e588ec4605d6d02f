//! SQLite audit sink

use audit_relay_core::QueryEvent;
use log::debug;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use super::{AuditError, AuditSink};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS query_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_at TEXT NOT NULL,
    bind_port INTEGER NOT NULL,
    client TEXT NOT NULL,
    client_port INTEGER NOT NULL,
    server TEXT NOT NULL,
    server_port INTEGER NOT NULL,
    sql_type TEXT NOT NULL,
    sql_string TEXT NOT NULL
)";

const INSERT: &str = "INSERT INTO query_log
    (captured_at, bind_port, client, client_port, server, server_port, sql_type, sql_string)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// Inserts each record as a row of the `query_log` table
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Open (or create) the database file and its table
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open(path.as_ref())?;
        debug!("Audit database opened: {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    /// In-memory database, mostly useful in tests
    pub fn in_memory() -> Result<Self, AuditError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AuditError> {
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of rows recorded so far
    pub fn count(&self) -> Result<u64, AuditError> {
        let conn = self.conn.lock().map_err(|_| AuditError::Closed)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM query_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl AuditSink for SqliteSink {
    fn record(&self, event: QueryEvent) -> Result<(), AuditError> {
        let conn = self.conn.lock().map_err(|_| AuditError::Closed)?;
        conn.execute(
            INSERT,
            params![
                event.captured_at.to_rfc3339(),
                event.bind_port,
                event.client_ip.to_string(),
                event.client_port,
                event.server_ip.to_string(),
                event.server_port,
                event.command.label(),
                event.sql,
            ],
        )?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_relay_core::{classify, SessionEndpoints};

    fn endpoints() -> SessionEndpoints {
        SessionEndpoints {
            client: "192.168.1.20:50123".parse().unwrap(),
            server: "10.0.0.7:3306".parse().unwrap(),
            bind_port: 8002,
        }
    }

    #[test]
    fn test_rows_are_inserted() {
        let sink = SqliteSink::in_memory().unwrap();
        let chunk = b"\x1b\x00\x00\x00\x03SELECT * FROM t WHERE a='x'";
        sink.record(QueryEvent::new(&endpoints(), classify(chunk).unwrap()))
            .unwrap();
        let chunk = b"\x05\x00\x00\x00\x0c\x2a\x00\x00\x00";
        sink.record(QueryEvent::new(&endpoints(), classify(chunk).unwrap()))
            .unwrap();

        assert_eq!(sink.count().unwrap(), 2);

        let conn = sink.conn.lock().unwrap();
        let (client, sql_type, sql): (String, String, String) = conn
            .query_row(
                "SELECT client, sql_type, sql_string FROM query_log ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(client, "192.168.1.20");
        assert_eq!(sql_type, "Query");
        assert_eq!(sql, "SELECT * FROM t WHERE a=\\'x\\'");
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let chunk = b"\x01\x00\x00\x00\x01";

        let sink = SqliteSink::open(&path).unwrap();
        sink.record(QueryEvent::new(&endpoints(), classify(chunk).unwrap()))
            .unwrap();
        drop(sink);

        let sink = SqliteSink::open(&path).unwrap();
        assert_eq!(sink.count().unwrap(), 1);
    }
}
