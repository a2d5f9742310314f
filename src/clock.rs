//! Time source for the monitoring loop
//!
//! The loop never calls `Utc::now` or `thread::sleep` directly so tests and
//! replays can advance cycles synchronously.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub trait Clock {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Block until `duration` has elapsed
    fn sleep(&mut self, duration: Duration);
}

/// Real time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced time; `sleep` returns immediately after advancing
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: DateTime<Utc>,
    slept: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: start,
            slept: Duration::ZERO,
        }
    }

    pub fn advance(&mut self, duration: Duration) {
        // Durations past chrono's range leave the clock where it is
        if let Ok(step) = chrono::Duration::from_std(duration) {
            self.now += step;
        }
    }

    /// Total time passed to `sleep`
    pub fn total_slept(&self) -> Duration {
        self.slept
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.slept += duration;
        self.advance(duration);
    }
}
