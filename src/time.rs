//! Server timestamps with a clock abstraction for testability.

use chrono::Local;

/// Timestamp layout stamped on every broadcast message
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Source of server-assigned timestamps
pub trait Clock: Send + Sync {
    /// Current time, already rendered for the wire
    fn now(&self) -> String;
}

/// System clock (local time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Fixed clock for tests
#[derive(Debug, Clone)]
pub struct FixedClock {
    timestamp: String,
}

impl FixedClock {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> String {
        self.timestamp.clone()
    }
}
