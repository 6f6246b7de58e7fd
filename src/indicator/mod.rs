//! High/low reference-level indicator.
//!
//! Resolves a configured period into a candle filter, then computes the
//! extremes of the filtered window.

pub mod high_low;
pub mod period;

use thiserror::Error;

pub use high_low::{HighLowConfig, HighLowIndicator, HighLowResult};
pub use period::{effective_zone, filter_candles, CalendarPeriod, FetchPlan, PeriodSpec};

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("no candles supplied")]
    EmptyInput,
    #[error("no candles fall inside the configured period")]
    EmptyPeriod,
    #[error("invalid candle data: {0}")]
    InvalidCandleData(String),
    #[error("invalid period: {0}")]
    InvalidPeriod(String),
}
