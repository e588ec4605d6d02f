//! Error types for the audit relay
//!
//! This module provides error types for the relay server. Startup errors
//! (resolution, bind) are fatal; dial errors end a single session; audit
//! errors are only ever logged.

use audit_relay_core::CoreError;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::audit::AuditError;

/// Result type for the relay
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error type for the relay
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source error
    #[error("Configuration source error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Address could not be resolved
    #[error("Failed to resolve {addr}: {reason}")]
    Resolve {
        /// Address as configured
        addr: String,
        /// Resolver failure
        reason: String,
    },

    /// Listener could not be bound
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        /// Address the listener was bound to
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Backend connection failed
    #[error("Failed to connect to backend {addr}: {source}")]
    Dial {
        /// Backend address
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// Backend connection timed out
    #[error("Timed out after {timeout:?} connecting to backend {addr}")]
    DialTimeout {
        /// Backend address
        addr: String,
        /// Connect timeout that elapsed
        timeout: Duration,
    },

    /// Audit sink error
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Helper function to convert a displayable error into a configuration error
pub fn to_config_error<E: ToString>(err: E) -> ProxyError {
    ProxyError::Config(err.to_string())
}
