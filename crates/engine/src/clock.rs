//! Wall-clock source for `CreatedAt` / `UpdatedAt`
//!
//! The engine never calls `Utc::now()` directly so tests can pin time and
//! produce deterministic index orderings.

use chrono::{Duration, Utc};
use evstore_core::Timestamp;
use parking_lot::Mutex;
use std::fmt::Debug;

/// Source of commit timestamps
pub trait Clock: Send + Sync + Debug {
    /// Current time
    fn now(&self) -> Timestamp;
}

/// System UTC clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually driven clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Start the clock at `start`
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
