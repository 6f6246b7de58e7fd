//! Bounded retry with linear backoff.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Wraps a fallible async operation with bounded attempts.
///
/// Backoff is linear: attempt `n` sleeps `base_delay * n` before retrying.
/// The last error is propagated once attempts are exhausted.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    attempts: u32,
    base_delay: Duration,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryExecutor {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Runs `op`, retrying every failure.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(label, op, |_| true).await
    }

    /// Runs `op`, retrying only failures for which `retryable` holds.
    pub async fn execute_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts && retryable(&err) => {
                    warn!(
                        "{}: attempt {}/{} failed: {}; retrying",
                        label, attempt, self.attempts, err
                    );
                    tokio::time::sleep(self.base_delay * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
