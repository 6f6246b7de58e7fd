//! Circuit breaker for the venue transport path.
//!
//! After `failure_threshold` consecutive transport failures the breaker
//! opens and requests fail fast instead of hitting a venue that is already
//! struggling. Once the cooldown elapses a single probe is let through
//! (half-open); success closes the breaker again.
//!
//! The hot path is lock-free: state checks and transitions use atomics only.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

/// Breaker state, encoded as `u8` for atomic storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Requests pass through.
    Closed = 0,
    /// Requests are rejected until the cooldown elapses.
    Open = 1,
    /// One probe request is allowed to test recovery.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    last_failure_ms: AtomicI64,
    failure_threshold: u32,
    cooldown_ms: i64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicI64::new(0),
            failure_threshold: failure_threshold.max(1),
            cooldown_ms: cooldown.as_millis() as i64,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether a request may proceed. An open breaker whose cooldown has
    /// elapsed flips to half-open and admits the caller as the probe.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed =
                    Utc::now().timestamp_millis() - self.last_failure_ms.load(Ordering::Acquire);
                if elapsed < self.cooldown_ms {
                    return false;
                }
                // Only one thread wins the transition; both may proceed as
                // the venue is due a probe either way.
                if self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    info!("Circuit breaker half-open, probing venue");
                }
                true
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);

        if failures >= self.failure_threshold {
            let prev = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
            if prev != CircuitState::Open as u8 {
                warn!(
                    consecutive_failures = failures,
                    "Circuit breaker opened after repeated transport failures"
                );
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_resets_the_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_admits_a_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(5));
        breaker.record_failure();
        assert!(!breaker.allow_request());

        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_failures_are_counted() {
        use std::sync::Arc;
        use std::thread;

        let breaker = Arc::new(CircuitBreaker::new(50, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&breaker);
                thread::spawn(move || {
                    for _ in 0..20 {
                        b.record_failure();
                        let _ = b.allow_request();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.failures() >= 50);
    }
}
