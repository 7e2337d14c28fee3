//! Rate limiting for recurring warnings.
//!
//! Keeps the first occurrence visible and repeats at most once per interval,
//! so a flapping source cannot flood the log.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Interval-based gate for recurring log statements.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogThrottle {
    /// Interval used when none is configured.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(600);

    /// Create a throttle emitting at most once per `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Whether the caller should emit now; records the emission when `true`.
    pub fn allow(&self) -> bool {
        let mut last = self.last.lock();
        match *last {
            Some(at) if at.elapsed() < self.interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
