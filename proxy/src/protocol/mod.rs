//! Relay-side protocol handling
//!
//! This module provides the half-closable connection wrapper the relay
//! pumps bytes through, and the sniffer that classifies MySQL client
//! commands on the way to the backend.

/// Connection wrapper with a pooled read buffer
pub mod connection;

/// Client command sniffer
pub mod sniffer;

// Re-export common types
pub use self::connection::{Connection, ConnectionReader, ConnectionWriter};
pub use self::sniffer::Sniffer;
