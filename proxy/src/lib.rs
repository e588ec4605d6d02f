//! MySQL Audit Relay
//!
//! This crate provides a transparent TCP relay that sits between MySQL
//! clients and a MySQL server, forwards bytes unchanged in both directions
//! and records the commands clients send.

// Error types and result
pub mod error;
pub use error::{ProxyError, Result};

// Configuration
pub mod config;
pub use config::{AuditConfig, AuditSinkKind, ProxyConfig};

// Audit sinks
pub mod audit;
pub use audit::{build_sink, AuditError, AuditHandle, AuditSink};

// Connection wrapper and command sniffer
pub mod protocol;
pub use protocol::{Connection, Sniffer};

// Relay sessions
pub mod session;
pub use session::{SessionStats, Transport};

// Server implementation
pub mod server;
pub use server::{ProxyServer, ShutdownHandle};

// Signal handling
pub mod signals;
