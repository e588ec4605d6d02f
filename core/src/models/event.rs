//! Audit events
//!
//! A [`QueryEvent`] is produced for each classified client chunk and handed
//! to an audit sink straight away; nothing keeps it afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use super::command::{Classification, CommandKind};

/// Addresses of one relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEndpoints {
    /// Remote address of the client socket
    pub client: SocketAddr,

    /// Remote address of the backend socket
    pub server: SocketAddr,

    /// Local port the client connected to
    pub bind_port: u16,
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// When the command was captured
    pub captured_at: DateTime<Utc>,

    /// Client IP address
    pub client_ip: IpAddr,

    /// Client port
    pub client_port: u16,

    /// Backend IP address
    pub server_ip: IpAddr,

    /// Backend port
    pub server_port: u16,

    /// Local port the client connected to
    pub bind_port: u16,

    /// Command kind
    pub command: CommandKind,

    /// Escaped SQL string
    pub sql: String,
}

impl QueryEvent {
    /// Build a record for a classification captured on a session
    pub fn new(endpoints: &SessionEndpoints, classification: Classification) -> Self {
        Self {
            captured_at: Utc::now(),
            client_ip: endpoints.client.ip(),
            client_port: endpoints.client.port(),
            server_ip: endpoints.server.ip(),
            server_port: endpoints.server.port(),
            bind_port: endpoints.bind_port,
            command: classification.kind,
            sql: classification.sql,
        }
    }
}
