//! Monotonic interval reporter for coarse per-request instrumentation.
//!
//! Intervals are measured with `Instant` and logged at debug level;
//! snapshots are best-effort diagnostics, not exact accounting.

use std::time::{Duration, Instant};

/// Reports elapsed intervals against a monotonic clock.
///
/// `report` logs and returns the time since the previous report (or since
/// construction for the first call), then restarts the interval.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    last: Instant,
}

impl Timer {
    /// Starts a new interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Logs the elapsed interval tagged with `what` and resets.
    pub fn report(&mut self, what: &str) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        tracing::debug!(
            elapsed_us = elapsed.as_micros() as u64,
            "timing: {what}"
        );
        elapsed
    }

    /// Elapsed time in the current interval without resetting.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.last.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
