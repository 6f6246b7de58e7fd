//! Exchange Abstraction Layer
//!
//! Venue-agnostic market-data contract and factories. New venues are added
//! by implementing [`MarketDataProvider`] without touching strategy code.
//! Every adapter funnels its network calls through a [`RequestGuard`] so the
//! rate limiter, circuit breaker and retry policy are applied uniformly.

pub mod binance;
pub mod capital;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::resilience::{CircuitBreaker, RateLimiter, RetryExecutor};
use crate::timeutil::Interval;
use crate::types::{Candle, MarketSnapshot, Ticker24h};

pub use binance::{BinanceMarket, BinanceProvider};
pub use capital::CapitalProvider;

/// Per-request timeout applied at the HTTP client level.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("provider unhealthy: {0}")]
    Unhealthy(String),
    #[error("circuit breaker open; request rejected")]
    CircuitOpen,
    #[error("session error: {0}")]
    Session(String),
    #[error("malformed venue payload: {0}")]
    Payload(String),
    #[error("missing credentials: {0}")]
    Credentials(String),
}

impl ProviderError {
    /// Transport-level failures are retried; everything else is fatal for
    /// the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Uniform market-data contract implemented by every venue adapter.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Stable identifier, e.g. `"binance"`.
    fn name(&self) -> &'static str;

    /// Opens sessions, loads metadata and verifies connectivity. Other
    /// methods may call this lazily.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Releases sessions, sockets and tokens.
    async fn disconnect(&self) -> Result<(), ProviderError>;

    /// Cheap liveness check; false until initialized.
    async fn is_healthy(&self) -> bool;

    async fn get_market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError>;

    /// Ordered ascending candles, at most `limit` of them.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError>;

    async fn get_ticker_24h(&self, symbol: &str) -> Result<Ticker24h, ProviderError>;
}

/// Admission + resilience pipeline shared by all calls of one venue:
/// token-bucket slot, circuit-breaker gate, then bounded retries.
pub struct RequestGuard {
    limiter: Arc<RateLimiter>,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
}

impl RequestGuard {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            breaker: CircuitBreaker::default(),
            retry: RetryExecutor::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Runs one logical venue request through the pipeline. The rate-limit
    /// slot is acquired once; retried attempts reuse it (tokens are spent,
    /// never refunded).
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.limiter.wait_for_slot().await;
        if !self.breaker.allow_request() {
            return Err(ProviderError::CircuitOpen);
        }

        let result = self
            .retry
            .execute_if(label, op, ProviderError::is_retryable)
            .await;

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.is_retryable() => self.breaker.record_failure(),
            Err(_) => {}
        }
        result
    }
}

/// Venue identifier for factory and configuration surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    Binance,
    Capital,
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::Binance => write!(f, "binance"),
            ProviderId::Capital => write!(f, "capital"),
        }
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binance" => Ok(ProviderId::Binance),
            "capital" => Ok(ProviderId::Capital),
            _ => Err(format!(
                "Unknown provider: {}. Valid options: binance, capital",
                s
            )),
        }
    }
}

/// Credentials for venue connections, loaded from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub api_secret: String,
    /// Account identifier, required by the CFD broker's session handshake.
    pub identifier: Option<String>,
    /// Use the venue's demo environment when available.
    pub demo: bool,
}

impl ProviderCredentials {
    /// Reads credentials for the given venue from environment variables.
    ///
    /// Binance market-data endpoints are public, so absent keys are allowed
    /// there; the CFD broker cannot open a session without its triplet.
    pub fn from_env(provider: ProviderId) -> Result<Self, ProviderError> {
        match provider {
            ProviderId::Binance => Ok(Self {
                api_key: std::env::var("BINANCE_API_KEY").unwrap_or_default(),
                api_secret: std::env::var("BINANCE_API_SECRET").unwrap_or_default(),
                identifier: None,
                demo: false,
            }),
            ProviderId::Capital => {
                let require = |name: &str| {
                    std::env::var(name)
                        .map_err(|_| ProviderError::Credentials(format!("{} must be set", name)))
                };
                Ok(Self {
                    api_key: require("CAPITAL_API_KEY")?,
                    api_secret: require("CAPITAL_PASSWORD")?,
                    identifier: Some(require("CAPITAL_IDENTIFIER")?),
                    demo: std::env::var("CAPITAL_DEMO")
                        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                        .unwrap_or(false),
                })
            }
        }
    }
}

/// Builds a default-wired provider: fresh rate limiter, default breaker and
/// retry policy, no cache. Hosts wanting a shared limiter or a candle cache
/// construct the adapter directly.
pub fn create_provider(
    provider: ProviderId,
    credentials: ProviderCredentials,
) -> Arc<dyn MarketDataProvider> {
    let limiter = Arc::new(RateLimiter::default());
    match provider {
        ProviderId::Binance => Arc::new(BinanceProvider::new(
            credentials,
            BinanceMarket::Spot,
            limiter,
        )),
        ProviderId::Capital => Arc::new(CapitalProvider::new(credentials, limiter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_round_trip() {
        assert_eq!("binance".parse::<ProviderId>().unwrap(), ProviderId::Binance);
        assert_eq!("Capital".parse::<ProviderId>().unwrap(), ProviderId::Capital);
        assert!("ftx".parse::<ProviderId>().is_err());
        assert_eq!(ProviderId::Binance.to_string(), "binance");
    }

    #[test]
    fn test_retryability() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Transport("reset".into()).is_retryable());
        assert!(ProviderError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ProviderError::Http {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!ProviderError::CircuitOpen.is_retryable());
        assert!(!ProviderError::Credentials("missing".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_request_guard_fails_fast_when_breaker_open() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let guard = RequestGuard {
            limiter: Arc::new(RateLimiter::default()),
            breaker: CircuitBreaker::new(1, Duration::from_secs(60)),
            retry: RetryExecutor::new(1, Duration::from_millis(1)),
        };

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = guard
            .run("probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Transport("down".into())) }
            })
            .await;
        assert!(result.is_err());

        // Breaker is now open: the next call never reaches the closure.
        let result: Result<(), _> = guard
            .run("probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
