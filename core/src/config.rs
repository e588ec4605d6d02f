//! Configuration for the core crate
//!
//! This module provides the buffer pool settings shared by every session.

use serde::{Serialize, Deserialize};
use crate::error::{to_config_error, Result};

/// Default size of a pooled read buffer in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Buffer pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Size of each buffer, also the maximum chunk read from a socket
    pub buffer_size: usize,

    /// Maximum number of idle buffers kept for reuse (0 = unbounded)
    pub max_pooled: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_pooled: 0,
        }
    }
}

impl BufferPoolConfig {
    /// Create a configuration for buffers of the given size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        BufferPoolConfig {
            buffer_size,
            ..Default::default()
        }
    }

    /// Check that the configuration can back a relay
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(to_config_error("buffer size must be a positive integer"));
        }
        Ok(())
    }
}
