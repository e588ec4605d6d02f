//! Configuration for the relay server
//!
//! This module provides configuration options for the relay. Values come
//! from built-in defaults, an optional configuration file, `AUDIT_RELAY__*`
//! environment variables and finally command-line flags, in that order.

use audit_relay_core::BufferPoolConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{to_config_error, ProxyError, Result};

/// Prefix of environment variables read by [`ProxyConfig::load`]
pub const ENV_PREFIX: &str = "AUDIT_RELAY";

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listening address for the relay (`:port` listens on all interfaces)
    pub bind_addr: String,

    /// Backend server address
    pub backend_addr: String,

    /// Size of pooled read buffers in bytes
    pub buffer_size: usize,

    /// Maximum number of idle buffers kept for reuse (0 = unbounded)
    pub max_pooled_buffers: usize,

    /// Backend connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Whether to trace every classified command
    pub verbose: bool,

    /// Stop accepting after the first session completes
    pub oneshot: bool,

    /// Audit sink configuration
    pub audit: AuditConfig,
}

/// Where audit records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Records are not persisted
    #[default]
    None,

    /// Records are written to the `audit` log target
    Log,

    /// Records are appended to a JSON Lines file
    Jsonl,

    /// Records are inserted into a SQLite database
    Sqlite,
}

/// Audit configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Sink kind
    pub sink: AuditSinkKind,

    /// File used by the `jsonl` and `sqlite` sinks
    pub path: Option<PathBuf>,

    /// Hand records to a background writer through a queue of this size
    pub queue_capacity: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: ":8002".to_string(),
            backend_addr: "127.0.0.1:8003".to_string(),
            buffer_size: audit_relay_core::config::DEFAULT_BUFFER_SIZE,
            max_pooled_buffers: 0,
            connect_timeout_ms: 2000,
            verbose: false,
            oneshot: false,
            audit: AuditConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Create a new relay configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from an optional file and the environment
    ///
    /// The file format follows its extension (TOML, YAML, JSON, ...).
    /// Nested keys are separated by `__` in environment variables, for
    /// example `AUDIT_RELAY__AUDIT__SINK=sqlite`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Create a configuration for tests: ephemeral local port, given backend
    pub fn for_testing(backend_addr: SocketAddr) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            backend_addr: backend_addr.to_string(),
            buffer_size: 1024,
            connect_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Check the configuration for values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(to_config_error("bind address is empty"));
        }
        if self.backend_addr.trim().is_empty() {
            return Err(to_config_error("backend address is empty"));
        }
        self.pool_config().validate()?;
        if self.connect_timeout_ms == 0 {
            return Err(to_config_error("connect timeout must be positive"));
        }
        if self.audit.queue_capacity == Some(0) {
            return Err(to_config_error("audit queue capacity must be positive"));
        }
        match self.audit.sink {
            AuditSinkKind::Jsonl | AuditSinkKind::Sqlite if self.audit.path.is_none() => Err(
                to_config_error(format!("audit sink {:?} requires a path", self.audit.sink)),
            ),
            _ => Ok(()),
        }
    }

    /// Backend connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Buffer pool settings derived from this configuration
    pub fn pool_config(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            buffer_size: self.buffer_size,
            max_pooled: self.max_pooled_buffers,
        }
    }
}

/// Expand the `:port` shorthand to a wildcard listen address
pub fn normalize_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

/// Resolve a `host:port` string to the first socket address it names
pub async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    let normalized = normalize_addr(addr);
    let mut addrs = tokio::net::lookup_host(normalized.as_str())
        .await
        .map_err(|e| ProxyError::Resolve {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    addrs.next().ok_or_else(|| ProxyError::Resolve {
        addr: addr.to_string(),
        reason: "no addresses found".to_string(),
    })
}
