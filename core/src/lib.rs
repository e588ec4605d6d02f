//! # Audit Relay Core
//!
//! Core data structures and utilities for the MySQL audit relay.
//! This crate provides the socket-free building blocks: the pooled read
//! buffers, the client command table, payload escaping and audit events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod models;
pub mod utils;

/// Re-export common types for ease of use
pub use config::BufferPoolConfig;
pub use error::{CoreError, Result};
pub use models::{classify, Classification, CommandKind, QueryEvent, SessionEndpoints};
pub use utils::{BufferPool, PooledBuffer, Timer};

/// Version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
