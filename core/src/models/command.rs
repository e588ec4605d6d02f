//! MySQL client command table
//!
//! A client packet starts with a 3-byte little-endian payload length and a
//! 1-byte sequence id. For commands the first payload byte is the command
//! code and the remainder is its argument (SQL text, schema name, ...).
//!
//! Only a subset of commands is audited. Each audited command is one row of
//! [`COMMAND_TABLE`]; adding a command means adding a row.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::string::escape_payload;

/// Length of the packet header (payload length + sequence id)
pub const PACKET_HEADER_LEN: usize = 4;

/// Offset of the command byte in a client packet
pub const COMMAND_OFFSET: usize = PACKET_HEADER_LEN;

/// Offset of the command argument in a client packet
pub const PAYLOAD_OFFSET: usize = COMMAND_OFFSET + 1;

/// Shortest chunk that carries a command byte
pub const MIN_COMMAND_LEN: usize = PAYLOAD_OFFSET;

/// COM_QUIT
pub const COM_QUIT: u8 = 0x01;
/// COM_INIT_DB
pub const COM_INIT_DB: u8 = 0x02;
/// COM_QUERY
pub const COM_QUERY: u8 = 0x03;
/// COM_FIELD_LIST (not audited)
pub const COM_FIELD_LIST: u8 = 0x04;
/// COM_CREATE_DB
pub const COM_CREATE_DB: u8 = 0x05;
/// COM_DROP_DB
pub const COM_DROP_DB: u8 = 0x06;
/// COM_REFRESH
pub const COM_REFRESH: u8 = 0x07;
/// COM_PROCESS_KILL
pub const COM_PROCESS_KILL: u8 = 0x0c;
/// COM_PING (not audited)
pub const COM_PING: u8 = 0x0e;
/// COM_STMT_PREPARE
pub const COM_STMT_PREPARE: u8 = 0x16;
/// COM_STMT_EXECUTE
pub const COM_STMT_EXECUTE: u8 = 0x17;

/// Audited command kinds
///
/// Serialized with the label stored in audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Client closes the session
    Quit,

    /// Change the default schema (`use <schema>`)
    #[serde(rename = "Schema")]
    InitDb,

    /// Text protocol query
    Query,

    /// Create a schema
    #[serde(rename = "CreateDB")]
    CreateDb,

    /// Drop a schema
    #[serde(rename = "DropDB")]
    DropDb,

    /// Flush tables or caches
    Refresh,

    /// Prepare a statement
    #[serde(rename = "Prepare Query")]
    StmtPrepare,

    /// Execute a prepared statement
    #[serde(rename = "Prepare Args")]
    StmtExecute,

    /// Kill a server thread
    #[serde(rename = "Kill")]
    ProcessKill,
}

impl CommandKind {
    /// Label stored in audit records
    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    /// Wire code of the command
    pub fn code(&self) -> u8 {
        self.spec().code
    }

    /// Table row describing this command
    pub fn spec(&self) -> &'static CommandSpec {
        COMMAND_TABLE
            .iter()
            .find(|spec| spec.kind == *self)
            .unwrap_or(&COMMAND_TABLE[0])
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How the SQL string of a record is derived from the packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRule {
    /// Use a fixed string and ignore the packet payload
    Literal(&'static str),

    /// Escape the bytes after the command byte
    Escaped,
}

/// One row of the command table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Wire code
    pub code: u8,

    /// Command kind
    pub kind: CommandKind,

    /// Label stored in audit records
    pub label: &'static str,

    /// Prefix of the verbose trace line, followed by the raw payload
    pub verbose_prefix: &'static str,

    /// Payload extraction rule
    pub payload: PayloadRule,
}

/// Audited commands
pub const COMMAND_TABLE: [CommandSpec; 9] = [
    CommandSpec {
        code: COM_QUIT,
        kind: CommandKind::Quit,
        label: "Quit",
        verbose_prefix: "Quit: ",
        payload: PayloadRule::Literal("user quit"),
    },
    CommandSpec {
        code: COM_INIT_DB,
        kind: CommandKind::InitDb,
        label: "Schema",
        verbose_prefix: "schema: use ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_QUERY,
        kind: CommandKind::Query,
        label: "Query",
        verbose_prefix: "Query: ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_CREATE_DB,
        kind: CommandKind::CreateDb,
        label: "CreateDB",
        verbose_prefix: "CreateDB: ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_DROP_DB,
        kind: CommandKind::DropDb,
        label: "DropDB",
        verbose_prefix: "DropDB: ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_REFRESH,
        kind: CommandKind::Refresh,
        label: "Refresh",
        verbose_prefix: "Refresh: ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_STMT_PREPARE,
        kind: CommandKind::StmtPrepare,
        label: "Prepare Query",
        verbose_prefix: "Prepare Query: ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_STMT_EXECUTE,
        kind: CommandKind::StmtExecute,
        label: "Prepare Args",
        verbose_prefix: "Prepare Args: ",
        payload: PayloadRule::Escaped,
    },
    CommandSpec {
        code: COM_PROCESS_KILL,
        kind: CommandKind::ProcessKill,
        label: "Kill",
        verbose_prefix: "Kill: kill connection ",
        payload: PayloadRule::Escaped,
    },
];

/// Find the table row for a command code
pub fn lookup(code: u8) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.code == code)
}

/// Result of classifying one client chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Command kind
    pub kind: CommandKind,

    /// Escaped SQL string for the audit record
    pub sql: String,

    /// Human-readable description for verbose logging
    pub verbose: String,
}

/// Classify one chunk read from the client
///
/// Returns `None` for chunks shorter than [`MIN_COMMAND_LEN`] and for
/// command codes that are not in [`COMMAND_TABLE`].
pub fn classify(chunk: &[u8]) -> Option<Classification> {
    if chunk.len() < MIN_COMMAND_LEN {
        return None;
    }

    let spec = lookup(chunk[COMMAND_OFFSET])?;
    let payload = &chunk[PAYLOAD_OFFSET..];

    let (sql, shown) = match spec.payload {
        PayloadRule::Literal(text) => (text.to_string(), text.to_string()),
        PayloadRule::Escaped => (
            escape_payload(payload),
            String::from_utf8_lossy(payload).into_owned(),
        ),
    };

    Some(Classification {
        kind: spec.kind,
        sql,
        verbose: format!("{}{}", spec.verbose_prefix, shown),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn packet(command: u8, payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() + 1) as u32;
        let mut buf = len.to_le_bytes()[..3].to_vec();
        buf.push(0);
        buf.push(command);
        buf.extend_from_slice(payload);
        buf
    }

    #[rstest]
    #[case(0x01, CommandKind::Quit, "Quit")]
    #[case(0x02, CommandKind::InitDb, "Schema")]
    #[case(0x03, CommandKind::Query, "Query")]
    #[case(0x05, CommandKind::CreateDb, "CreateDB")]
    #[case(0x06, CommandKind::DropDb, "DropDB")]
    #[case(0x07, CommandKind::Refresh, "Refresh")]
    #[case(0x0c, CommandKind::ProcessKill, "Kill")]
    #[case(0x16, CommandKind::StmtPrepare, "Prepare Query")]
    #[case(0x17, CommandKind::StmtExecute, "Prepare Args")]
    fn test_command_table(#[case] code: u8, #[case] kind: CommandKind, #[case] label: &str) {
        let classification = classify(&packet(code, b"x")).unwrap();
        assert_eq!(classification.kind, kind);
        assert_eq!(kind.label(), label);
        assert_eq!(kind.code(), code);
        assert_eq!(lookup(code).map(|spec| spec.kind), Some(kind));
    }

    #[rstest]
    #[case(0x00)]
    #[case(COM_FIELD_LIST)]
    #[case(0x08)]
    #[case(COM_PING)]
    #[case(0x19)]
    #[case(0xff)]
    fn test_unlisted_codes_ignored(#[case] code: u8) {
        assert_eq!(classify(&packet(code, b"SELECT 1")), None);
    }

    #[test]
    fn test_length_boundary() {
        assert_eq!(classify(&[0x01, 0x00, 0x00, 0x00]), None);
        assert_eq!(classify(&[]), None);

        let classification = classify(&[0x01, 0x00, 0x00, 0x00, 0x03]).unwrap();
        assert_eq!(classification.kind, CommandKind::Query);
        assert_eq!(classification.sql, "");
    }

    #[test]
    fn test_query_is_escaped() {
        let classification = classify(&packet(COM_QUERY, b"SELECT 'a'\n")).unwrap();
        assert_eq!(classification.kind, CommandKind::Query);
        assert_eq!(classification.sql, "SELECT \\'a\\'\\n");
        assert_eq!(classification.verbose, "Query: SELECT 'a'\n");
    }

    #[test]
    fn test_quit_uses_literal() {
        let classification = classify(&packet(COM_QUIT, b"ignored bytes")).unwrap();
        assert_eq!(classification.kind, CommandKind::Quit);
        assert_eq!(classification.sql, "user quit");
        assert_eq!(classification.verbose, "Quit: user quit");
    }

    #[test]
    fn test_verbose_descriptions() {
        let schema = classify(&packet(COM_INIT_DB, b"sales")).unwrap();
        assert_eq!(schema.verbose, "schema: use sales");

        let kill = classify(&packet(COM_PROCESS_KILL, b"42")).unwrap();
        assert_eq!(kill.verbose, "Kill: kill connection 42");
    }

    #[test]
    fn test_label_serialization() {
        let json = serde_json::to_string(&CommandKind::StmtPrepare).unwrap();
        assert_eq!(json, "\"Prepare Query\"");
        let json = serde_json::to_string(&CommandKind::Query).unwrap();
        assert_eq!(json, "\"Query\"");
    }

    #[test]
    fn test_table_codes_unique() {
        for (i, a) in COMMAND_TABLE.iter().enumerate() {
            for b in &COMMAND_TABLE[i + 1..] {
                assert_ne!(a.code, b.code);
                assert_ne!(a.kind, b.kind);
            }
        }
    }
}
