//! Correlation-crack strategy.
//!
//! A run fans out one candle fetch per asset (concurrently, all serialised
//! through the venue's rate limiter), computes a high/low reference level
//! per asset over the configured period, checks each asset's recent closes
//! against its level, and fires a [`Signal`] when exactly one asset broke
//! while enough of the others held.
//!
//! Runs are all-or-nothing: any fetch or indicator failure fails the whole
//! run and no partial signal is ever produced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::exchange::{MarketDataProvider, ProviderError};
use crate::indicator::{HighLowConfig, HighLowIndicator, IndicatorError, PeriodSpec};
use crate::strategy::cross_detector::{detect_cross, DEFAULT_CROSS_LOOKBACK};
use crate::timeutil::{Clock, Interval, SystemClock};
use crate::types::{AssetCondition, Candle, CrossDirection, Signal};

/// Confidence starts here when the pattern fires at all.
pub const CONFIDENCE_BASE: f64 = 0.5;
/// Added per held asset beyond the first.
pub const CONFIDENCE_PER_EXTRA_HELD: f64 = 0.1;
/// Multiplier on the mean relative distance of held closes from their levels.
pub const CONFIDENCE_DISTANCE_WEIGHT: f64 = 2.0;
/// Ceiling on the distance contribution.
pub const CONFIDENCE_DISTANCE_CAP: f64 = 0.3;

const MIN_GROUP_SIZE: usize = 2;
const MAX_GROUP_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Invalid configuration")]
    InvalidConfig,
    #[error("failed to fetch candles for {symbol}: {source}")]
    FetchFailure {
        symbol: String,
        source: ProviderError,
    },
    #[error("failed to compute reference level for {symbol}: {source}")]
    ReferenceFailure {
        symbol: String,
        source: IndicatorError,
    },
}

/// Configuration of one correlated group.
#[derive(Debug, Clone)]
pub struct CorrelationCrackConfig {
    /// The correlated instruments, two to four of them.
    pub primary_assets: Vec<String>,
    /// Reference window for the high/low levels.
    pub period: PeriodSpec,
    pub direction: CrossDirection,
    pub use_body_high_low: bool,
    pub timezone: Option<String>,
    /// How many assets must hold their level for the pattern to count.
    pub min_correlated_assets: usize,
    /// Interval of the fetched candle series.
    pub market_data_interval: Interval,
    pub candles_limit: usize,
    pub cross_detection_lookback: usize,
}

impl CorrelationCrackConfig {
    pub fn new(
        primary_assets: Vec<String>,
        period: PeriodSpec,
        direction: CrossDirection,
    ) -> Self {
        Self {
            primary_assets,
            period,
            direction,
            use_body_high_low: false,
            timezone: None,
            min_correlated_assets: 1,
            market_data_interval: Interval::FiveMinutes,
            candles_limit: 100,
            cross_detection_lookback: DEFAULT_CROSS_LOOKBACK,
        }
    }

    fn validate(&self) -> Result<(), String> {
        let n = self.primary_assets.len();
        if !(MIN_GROUP_SIZE..=MAX_GROUP_SIZE).contains(&n) {
            return Err(format!(
                "correlated group needs {}..={} assets, got {}",
                MIN_GROUP_SIZE, MAX_GROUP_SIZE, n
            ));
        }
        self.period.validate()
    }
}

/// Phases of a strategy run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Validating,
    Fetching,
    Computing,
    Detecting,
    Deciding,
    Signalling,
    Quiet,
    Failed,
}

/// Outcome of one strategy run. `success` is false only for structured
/// failures; a run that simply found no pattern is a quiet success.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub success: bool,
    pub signal: Option<Signal>,
    pub conditions: Vec<AssetCondition>,
    pub reference_levels: HashMap<String, f64>,
    pub error: Option<String>,
}

/// Downstream signal receiver (notifier, channel, test probe).
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, signal: &Signal);
}

/// Sink forwarding signals into an mpsc channel.
pub struct ChannelSink {
    tx: mpsc::Sender<Signal>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Signal>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SignalSink for ChannelSink {
    async fn deliver(&self, signal: &Signal) {
        if self.tx.send(signal.clone()).await.is_err() {
            warn!("Signal receiver dropped; delivery skipped");
        }
    }
}

/// Orchestrates fan-out fetch, reference computation, cross detection and
/// the pattern decision for one correlated group.
pub struct CorrelationCrackStrategy {
    provider: Arc<dyn MarketDataProvider>,
    indicator: HighLowIndicator,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn SignalSink>>,
    phase: Mutex<RunPhase>,
}

impl CorrelationCrackStrategy {
    pub fn new(provider: Arc<dyn MarketDataProvider>, indicator: HighLowIndicator) -> Self {
        Self {
            provider,
            indicator,
            clock: Arc::new(SystemClock),
            sinks: Vec::new(),
            phase: Mutex::new(RunPhase::Idle),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SignalSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn current_phase(&self) -> RunPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().expect("phase lock poisoned") = phase;
        debug!(?phase, "Strategy phase");
    }

    /// Runs the strategy once. Failures come back as a structured result,
    /// never a panic; a valid run with no pattern is a success without a
    /// signal.
    #[instrument(name = "correlation_crack", skip_all)]
    pub async fn execute(&self, config: &CorrelationCrackConfig) -> StrategyResult {
        let result = match self.run(config).await {
            Ok(result) => result,
            Err(err) => {
                self.set_phase(RunPhase::Failed);
                error!("Strategy run failed: {}", err);
                StrategyResult {
                    success: false,
                    signal: None,
                    conditions: Vec::new(),
                    reference_levels: HashMap::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        self.set_phase(RunPhase::Idle);
        result
    }

    async fn run(&self, config: &CorrelationCrackConfig) -> Result<StrategyResult, StrategyError> {
        self.set_phase(RunPhase::Validating);
        config.validate().map_err(|reason| {
            warn!(%reason, "Rejected strategy configuration");
            StrategyError::InvalidConfig
        })?;

        // Concurrent fan-out; the first failure cancels the remaining
        // fetches. Each call is admitted by the shared rate limiter inside
        // the provider.
        self.set_phase(RunPhase::Fetching);
        let series: Vec<(String, Vec<Candle>)> =
            try_join_all(config.primary_assets.iter().map(|symbol| {
                let provider = Arc::clone(&self.provider);
                async move {
                    provider
                        .get_candles(symbol, config.market_data_interval, config.candles_limit)
                        .await
                        .map(|candles| (symbol.clone(), candles))
                        .map_err(|source| StrategyError::FetchFailure {
                            symbol: symbol.clone(),
                            source,
                        })
                }
            }))
            .await?;

        self.set_phase(RunPhase::Computing);
        let mut references = Vec::with_capacity(series.len());
        for (symbol, candles) in &series {
            let hl_config = HighLowConfig {
                symbol: symbol.clone(),
                period: config.period.clone(),
                use_body_high_low: config.use_body_high_low,
                timezone: config.timezone.clone(),
            };
            let high_low = self
                .indicator
                .calculate(candles, &hl_config)
                .map_err(|source| StrategyError::ReferenceFailure {
                    symbol: symbol.clone(),
                    source,
                })?;
            // Cross-under watches the period high, cross-over the low.
            let reference = match config.direction {
                CrossDirection::CrossUnder => high_low.high,
                CrossDirection::CrossOver => high_low.low,
            };
            references.push(reference);
        }

        self.set_phase(RunPhase::Detecting);
        let mut conditions = Vec::with_capacity(series.len());
        let mut reference_levels = HashMap::new();
        for ((symbol, candles), reference) in series.iter().zip(&references) {
            let current_price = candles.last().map(|c| c.close).unwrap_or(0.0);
            let cross = detect_cross(
                candles,
                *reference,
                config.direction,
                config.cross_detection_lookback,
            );
            conditions.push(AssetCondition {
                symbol: symbol.clone(),
                has_crossed: cross.has_crossed,
                cross_direction: cross.direction,
                current_price,
                reference_level: *reference,
                cross_time: cross.cross_time,
            });
            reference_levels.insert(symbol.clone(), *reference);
        }

        self.set_phase(RunPhase::Deciding);
        let (crossed, held): (Vec<&AssetCondition>, Vec<&AssetCondition>) =
            conditions.iter().partition(|c| c.has_crossed);

        let signal = if crossed.len() == 1 && held.len() >= config.min_correlated_assets {
            self.set_phase(RunPhase::Signalling);
            let trigger = crossed[0];
            let signal = Signal {
                trigger_asset: trigger.symbol.clone(),
                direction: config.direction,
                correlated_assets: held.iter().map(|c| c.symbol.clone()).collect(),
                reference_level: trigger.reference_level,
                confidence: confidence_score(&held),
                timestamp: self.clock.now(),
                conditions: conditions.clone(),
            };
            info!(
                trigger = %signal.trigger_asset,
                direction = %signal.direction,
                confidence = signal.confidence,
                "Correlation crack detected"
            );
            for sink in &self.sinks {
                sink.deliver(&signal).await;
            }
            Some(signal)
        } else {
            self.set_phase(RunPhase::Quiet);
            debug!(
                crossed = crossed.len(),
                held = held.len(),
                "No correlation crack this run"
            );
            None
        };

        Ok(StrategyResult {
            success: true,
            signal,
            conditions,
            reference_levels,
            error: None,
        })
    }
}

/// `base + 0.1 per extra held asset + capped distance bonus`, clamped to
/// [0, 1]. The distance bonus rewards held closes sitting well clear of
/// their levels.
pub fn confidence_score(held: &[&AssetCondition]) -> f64 {
    let average_distance = if held.is_empty() {
        0.0
    } else {
        held.iter()
            .map(|c| {
                if c.reference_level != 0.0 {
                    (c.current_price - c.reference_level).abs() / c.reference_level
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            / held.len() as f64
    };

    let score = CONFIDENCE_BASE
        + held.len().saturating_sub(1) as f64 * CONFIDENCE_PER_EXTRA_HELD
        + (average_distance * CONFIDENCE_DISTANCE_WEIGHT).min(CONFIDENCE_DISTANCE_CAP);
    score.clamp(0.0, 1.0)
}
