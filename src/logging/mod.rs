//! Rate-limited logging utilities.

use std::time::{Duration, Instant};

/// A lightweight admission gate for log statements, so a hot failure path
/// cannot storm the logs.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            suppressed: 0,
        }
    }

    /// Asks permission to emit. Returns `Some(suppressed_since_last)` when
    /// the interval has passed (resetting the counter), `None` otherwise.
    pub fn admit(&mut self) -> Option<u64> {
        let now = Instant::now();
        let due = match self.last_emit {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        };
        if due {
            self.last_emit = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}
