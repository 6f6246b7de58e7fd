//! Common Types Module
//!
//! Shared domain types used across the codebase to avoid circular dependencies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a level crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrossDirection {
    /// Close moved from at-or-below the reference level to above it.
    CrossOver,
    /// Close moved from at-or-above the reference level to below it.
    CrossUnder,
}

impl std::fmt::Display for CrossDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrossDirection::CrossOver => write!(f, "CROSS_OVER"),
            CrossDirection::CrossUnder => write!(f, "CROSS_UNDER"),
        }
    }
}

impl std::str::FromStr for CrossDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CROSS_OVER" => Ok(CrossDirection::CrossOver),
            "CROSS_UNDER" => Ok(CrossDirection::CrossUnder),
            _ => Err(format!(
                "Unknown direction: {}. Valid options: CROSS_OVER, CROSS_UNDER",
                s
            )),
        }
    }
}

/// Exchange-agnostic OHLCV candle for a fixed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// The trading symbol (e.g., "BTCUSDT", "EURUSD").
    pub symbol: String,
    /// Open instant of the bar, aligned to the interval boundary.
    pub open_time: DateTime<Utc>,
    /// Close instant of the bar (open + interval - 1ms for half-open sources).
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Trade count when the venue reports one.
    pub trades: Option<u64>,
}

impl Candle {
    /// Checks the OHLC ordering invariants and that the bar spans forward in time.
    pub fn is_well_formed(&self) -> bool {
        let body_min = self.open.min(self.close);
        let body_max = self.open.max(self.close);
        self.low <= body_min
            && body_max <= self.high
            && self.open_time < self.close_time
            && self.volume >= 0.0
    }

    /// Upper edge of the candle body.
    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    /// Lower edge of the candle body.
    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    /// Distance from the body top to the high.
    pub fn upper_wick(&self) -> f64 {
        self.high - self.body_high()
    }

    /// Distance from the body bottom to the low.
    pub fn lower_wick(&self) -> f64 {
        self.body_low() - self.low
    }

    /// True when the candle closed above its open.
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }
}

/// Point-in-time market state for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub change_24h: Option<Decimal>,
    pub change_percent_24h: Option<Decimal>,
}

/// Aggregate 24-hour statistics for a symbol.
///
/// Venues differ in what they report; fields a venue does not supply are
/// zero-filled rather than optional so downstream math never sees nulls.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ticker24h {
    pub symbol: String,
    pub last: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub vwap: Decimal,
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
    pub change: Decimal,
    pub percentage: Decimal,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Per-asset outcome of a correlation-crack evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetCondition {
    pub symbol: String,
    pub has_crossed: bool,
    pub cross_direction: Option<CrossDirection>,
    pub current_price: f64,
    pub reference_level: f64,
    pub cross_time: Option<DateTime<Utc>>,
}

/// Structured signal emitted when the correlation-crack pattern fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// The single asset that broke its reference level.
    pub trigger_asset: String,
    pub direction: CrossDirection,
    /// The correlated assets that held their levels.
    pub correlated_assets: Vec<String>,
    /// Reference level of the trigger asset.
    pub reference_level: f64,
    /// Pattern confidence in [0, 1].
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Full per-asset breakdown behind the decision.
    pub conditions: Vec<AssetCondition>,
}
