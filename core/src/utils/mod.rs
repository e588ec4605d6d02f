//! Utility functions and types
//!
//! This module provides the buffer pool, payload escaping and timing helpers.

pub mod pool;
pub mod string;
pub mod timer;

pub use pool::{BufferPool, PooledBuffer};
pub use string::{escape, escape_payload, to_unix_line_endings, unescape};
pub use timer::Timer;
