//! Timing utilities
//!
//! This module provides a small timer used to measure the phases of a relay
//! session (backend dial, byte transfer).

use std::time::{Duration, Instant};
use log::{debug, warn};

/// Timer for measuring elapsed time
#[derive(Debug, Clone)]
pub struct Timer {
    /// Name of the timer
    name: String,

    /// Start time
    start: Instant,

    /// Optional warning threshold
    warning_threshold: Option<Duration>,
}

impl Timer {
    /// Create a new timer with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Timer {
            name: name.into(),
            start: Instant::now(),
            warning_threshold: None,
        }
    }

    /// Set a warning threshold for the timer
    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold = Some(threshold);
        self
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Check if the timer has exceeded the warning threshold
    pub fn has_warning(&self) -> bool {
        match self.warning_threshold {
            Some(threshold) => self.elapsed() > threshold,
            None => false,
        }
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    /// Return the time since the last checkpoint and restart the timer
    pub fn checkpoint(&mut self, name: impl Into<String>) -> Duration {
        let elapsed = self.elapsed();
        let msg = format!("{} {}: {:?}", self.name, name.into(), elapsed);
        if self.has_warning() {
            warn!("{} [SLOW]", msg);
        } else {
            debug!("{}", msg);
        }
        self.reset();
        elapsed
    }
}
