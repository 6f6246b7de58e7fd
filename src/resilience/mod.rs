//! # Resilience Module
//!
//! Reusable resilience patterns guarding every venue request:
//! - `RateLimiter`: token-bucket admission control shared per venue.
//! - `RetryExecutor`: bounded retries with linear backoff.
//! - `CircuitBreaker`: fail-fast after consecutive transport failures.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::RetryExecutor;
