//! Token-bucket rate limiter.
//!
//! One bucket is shared by every adapter of a venue; all callers pass
//! through [`RateLimiter::wait_for_slot`] before touching the network.
//! Refill is computed on the wall clock so a regressed clock freezes the
//! bucket instead of minting tokens.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::logging::LogThrottle;

/// Polls after which a starved caller gives up waiting and proceeds.
/// Guards against unbounded blocking under clock skew.
const MAX_POLLS: u32 = 100;

const STALL_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity; also the request budget per window.
    pub max_tokens: u32,
    /// Window over which the full budget refills.
    pub window: Duration,
    /// Sleep between polls while waiting for a token.
    pub wait_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1200,
            window: Duration::from_secs(60),
            wait_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill_ms: i64,
}

/// Token-bucket admission control, safe under concurrent waiters.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    refill_per_ms: f64,
    bucket: Mutex<Bucket>,
    stall_log: Mutex<LogThrottle>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let refill_per_ms = config.max_tokens as f64 / config.window.as_millis() as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.max_tokens as f64,
                last_refill_ms: Utc::now().timestamp_millis(),
            }),
            stall_log: Mutex::new(LogThrottle::new(STALL_LOG_INTERVAL)),
            refill_per_ms,
            config,
        }
    }

    /// Refills and reports whether a request slot is available right now.
    /// Does not consume a token.
    pub fn check(&self) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");
        self.refill(&mut bucket);
        bucket.tokens >= 1.0
    }

    /// Blocks until a token is available, then consumes it.
    ///
    /// After [`MAX_POLLS`] unsuccessful polls the caller proceeds anyway;
    /// the anomaly is logged (throttled) but never propagated.
    pub async fn wait_for_slot(&self) {
        for _ in 0..MAX_POLLS {
            if self.try_consume() {
                return;
            }
            tokio::time::sleep(self.config.wait_interval).await;
        }

        if let Some(suppressed) = self
            .stall_log
            .lock()
            .expect("rate limiter lock poisoned")
            .admit()
        {
            warn!(
                suppressed_warnings = suppressed,
                "Rate limiter starved for {} polls; proceeding without a token", MAX_POLLS
            );
        }
    }

    /// Whole tokens currently available.
    pub fn remaining(&self) -> u32 {
        let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");
        self.refill(&mut bucket);
        bucket.tokens.floor() as u32
    }

    /// Instant at which the bucket will be full again.
    pub fn reset_time(&self) -> DateTime<Utc> {
        let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");
        self.refill(&mut bucket);
        let missing = self.config.max_tokens as f64 - bucket.tokens;
        let wait_ms = (missing / self.refill_per_ms).ceil() as i64;
        Utc::now() + chrono::Duration::milliseconds(wait_ms)
    }

    fn try_consume(&self) -> bool {
        let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now_ms = Utc::now().timestamp_millis();
        bucket.tokens = refill_tokens(
            bucket.tokens,
            self.config.max_tokens as f64,
            self.refill_per_ms,
            now_ms - bucket.last_refill_ms,
        );
        bucket.last_refill_ms = now_ms;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

/// Pure refill law: positive elapsed time mints tokens up to the cap,
/// regressed clocks mint nothing.
fn refill_tokens(tokens: f64, max_tokens: f64, refill_per_ms: f64, elapsed_ms: i64) -> f64 {
    if elapsed_ms <= 0 {
        return tokens;
    }
    (tokens + elapsed_ms as f64 * refill_per_ms).min(max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slow_config(max_tokens: u32) -> RateLimiterConfig {
        // One-hour window so refill during a test is negligible.
        RateLimiterConfig {
            max_tokens,
            window: Duration::from_secs(3600),
            wait_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_refill_saturates_at_capacity() {
        // A full window elapsed on a full bucket stays at max.
        let refilled = refill_tokens(1200.0, 1200.0, 1200.0 / 60_000.0, 60_000);
        assert_eq!(refilled, 1200.0);

        // Half a window on an empty bucket mints half the budget.
        let refilled = refill_tokens(0.0, 1200.0, 1200.0 / 60_000.0, 30_000);
        assert!((refilled - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_refill_ignores_clock_regression() {
        let refilled = refill_tokens(5.0, 1200.0, 0.02, -10_000);
        assert_eq!(refilled, 5.0);
    }

    #[tokio::test]
    async fn test_consecutive_slots_drain_the_bucket() {
        let limiter = RateLimiter::new(slow_config(5));
        for _ in 0..3 {
            limiter.wait_for_slot().await;
        }
        assert_eq!(limiter.remaining(), 2);
        assert!(limiter.check());
    }

    #[tokio::test]
    async fn test_empty_bucket_fails_check_but_never_blocks_forever() {
        let limiter = RateLimiter::new(slow_config(2));
        limiter.wait_for_slot().await;
        limiter.wait_for_slot().await;
        assert!(!limiter.check());
        assert_eq!(limiter.remaining(), 0);

        // Starved caller proceeds after the poll cap.
        limiter.wait_for_slot().await;
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_reset_time_is_in_the_future_when_drained() {
        let limiter = RateLimiter::new(slow_config(3));
        assert!(limiter.try_consume());
        let reset = limiter.reset_time();
        assert!(reset > Utc::now());
    }
}
