//! High/low extremum computation over a resolved period.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::indicator::period::{effective_zone, filter_candles, PeriodSpec};
use crate::indicator::IndicatorError;
use crate::timeutil::{Clock, Interval, SystemClock};
use crate::types::Candle;

/// Indicator inputs for one symbol.
#[derive(Debug, Clone)]
pub struct HighLowConfig {
    pub symbol: String,
    pub period: PeriodSpec,
    /// Compare candle bodies instead of wicks.
    pub use_body_high_low: bool,
    pub timezone: Option<String>,
}

impl HighLowConfig {
    pub fn new(symbol: impl Into<String>, period: PeriodSpec) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            use_body_high_low: false,
            timezone: None,
        }
    }
}

/// Reference levels of a period, with the instants they printed at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighLowResult {
    pub symbol: String,
    /// Interval inferred from the gap between the first two candles of the
    /// filtered window; "unknown" when no pair exists.
    pub interval_detected: String,
    /// Serialised period the levels were computed over.
    pub period: String,
    pub high: f64,
    pub low: f64,
    pub high_time: DateTime<Utc>,
    pub low_time: DateTime<Utc>,
    pub range: f64,
    pub range_percent: f64,
    pub calculated_at: DateTime<Utc>,
}

/// Computes period highs and lows; ties resolve to the first occurrence.
#[derive(Debug, Clone)]
pub struct HighLowIndicator {
    clock: Arc<dyn Clock>,
}

impl Default for HighLowIndicator {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }
}

impl HighLowIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn calculate(
        &self,
        candles: &[Candle],
        config: &HighLowConfig,
    ) -> Result<HighLowResult, IndicatorError> {
        if candles.is_empty() {
            return Err(IndicatorError::EmptyInput);
        }
        config
            .period
            .validate()
            .map_err(IndicatorError::InvalidPeriod)?;
        for (i, candle) in candles.iter().enumerate() {
            if !candle.is_well_formed() {
                return Err(IndicatorError::InvalidCandleData(format!(
                    "{} candle #{} violates OHLC ordering",
                    candle.symbol, i
                )));
            }
        }

        let now = self.clock.now();
        let zone = effective_zone(&config.period, config.timezone.as_deref());
        let window = filter_candles(candles, &config.period, &zone, now);
        if window.is_empty() {
            return Err(IndicatorError::EmptyPeriod);
        }

        // Single pass; strict comparisons keep the earliest extremum on ties.
        let pick = |c: &Candle| -> (f64, f64) {
            if config.use_body_high_low {
                (c.body_high(), c.body_low())
            } else {
                (c.high, c.low)
            }
        };

        let (first_high, first_low) = pick(&window[0]);
        let mut high = first_high;
        let mut low = first_low;
        let mut high_time = window[0].open_time;
        let mut low_time = window[0].open_time;

        for candle in &window[1..] {
            let (h, l) = pick(candle);
            if h > high {
                high = h;
                high_time = candle.open_time;
            }
            if l < low {
                low = l;
                low_time = candle.open_time;
            }
        }

        let range = high - low;
        let range_percent = if low > 0.0 { range / low * 100.0 } else { 0.0 };
        let interval_detected = detect_interval(&window);

        debug!(
            symbol = %config.symbol,
            period = %config.period.label(),
            high,
            low,
            "High/low computed over {} candles",
            window.len()
        );

        Ok(HighLowResult {
            symbol: config.symbol.clone(),
            interval_detected,
            period: config.period.label(),
            high,
            low,
            high_time,
            low_time,
            range,
            range_percent,
            calculated_at: now,
        })
    }
}

fn detect_interval(candles: &[Candle]) -> String {
    match candles {
        [first, second, ..] => {
            let gap = second.open_time.timestamp_millis() - first.open_time.timestamp_millis();
            Interval::nearest(gap).to_string()
        }
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::period::CalendarPeriod;

    #[derive(Debug)]
    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn candle(ms: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "EURUSD".to_string(),
            open_time: DateTime::from_timestamp_millis(ms).unwrap(),
            close_time: DateTime::from_timestamp_millis(ms + 3_599_999).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1.0,
            trades: None,
        }
    }

    // 2023-11-14 00:00 UTC.
    const NOV_14: i64 = 1_699_920_000_000;
    const HOUR: i64 = 3_600_000;

    fn indicator_at(ms: i64) -> HighLowIndicator {
        HighLowIndicator::with_clock(Arc::new(FixedClock(
            DateTime::from_timestamp_millis(ms).unwrap(),
        )))
    }

    #[test]
    fn test_prev_day_extremes() {
        // Hourly candles spanning all of Nov 13 UTC: flat at 100, spike to
        // 110 at 14:00, dip to 95 at 03:00.
        let day_start = NOV_14 - 24 * HOUR;
        let candles: Vec<Candle> = (0..24)
            .map(|h| {
                let ms = day_start + h * HOUR;
                match h {
                    3 => candle(ms, 100.0, 101.0, 95.0, 100.0),
                    14 => candle(ms, 100.0, 110.0, 99.0, 101.0),
                    _ => candle(ms, 100.0, 101.0, 99.0, 100.0),
                }
            })
            .collect();

        let indicator = indicator_at(NOV_14 + 10 * HOUR);
        let mut config = HighLowConfig::new("EURUSD", PeriodSpec::Calendar(CalendarPeriod::PrevDay));
        config.timezone = Some("UTC".to_string());

        let result = indicator.calculate(&candles, &config).unwrap();
        assert_eq!(result.high, 110.0);
        assert_eq!(result.low, 95.0);
        assert_eq!(result.high_time.timestamp_millis(), day_start + 14 * HOUR);
        assert_eq!(result.low_time.timestamp_millis(), day_start + 3 * HOUR);
        assert_eq!(result.range, 15.0);
        assert!((result.range_percent - 15.789473684210526).abs() < 1e-9);
        assert_eq!(result.interval_detected, "1h");
        assert_eq!(result.period, "prev_day");
    }

    #[test]
    fn test_rolling_window_takes_last_candles() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| {
                let c = 100.0 + i as f64;
                candle(NOV_14 + i as i64 * HOUR, c, c, c, c)
            })
            .collect();

        let indicator = indicator_at(NOV_14 + 12 * HOUR);
        let config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Rolling {
                periods: 3,
                interval: Interval::OneHour,
            },
        );
        let result = indicator.calculate(&candles, &config).unwrap();
        assert_eq!(result.high, 109.0);
        assert_eq!(result.low, 107.0);
    }

    #[test]
    fn test_body_toggle_ignores_wicks() {
        let candles = vec![
            candle(NOV_14, 100.0, 120.0, 80.0, 101.0),
            candle(NOV_14 + HOUR, 101.0, 119.0, 81.0, 99.0),
        ];
        let indicator = indicator_at(NOV_14 + 2 * HOUR);
        let mut config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Rolling {
                periods: 2,
                interval: Interval::OneHour,
            },
        );

        let wicks = indicator.calculate(&candles, &config).unwrap();
        assert_eq!(wicks.high, 120.0);
        assert_eq!(wicks.low, 80.0);

        config.use_body_high_low = true;
        let bodies = indicator.calculate(&candles, &config).unwrap();
        assert_eq!(bodies.high, 101.0);
        assert_eq!(bodies.low, 99.0);
    }

    #[test]
    fn test_doji_body_collapses_to_a_point() {
        let candles = vec![candle(NOV_14, 100.0, 105.0, 95.0, 100.0)];
        let indicator = indicator_at(NOV_14 + HOUR);
        let mut config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Rolling {
                periods: 1,
                interval: Interval::OneHour,
            },
        );
        config.use_body_high_low = true;

        let result = indicator.calculate(&candles, &config).unwrap();
        assert_eq!(result.high, result.low);
        assert_eq!(result.range, 0.0);
        assert_eq!(result.interval_detected, "unknown");
    }

    #[test]
    fn test_ties_keep_the_first_occurrence() {
        let candles = vec![
            candle(NOV_14, 100.0, 110.0, 90.0, 100.0),
            candle(NOV_14 + HOUR, 100.0, 110.0, 90.0, 100.0),
        ];
        let indicator = indicator_at(NOV_14 + 2 * HOUR);
        let config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Rolling {
                periods: 2,
                interval: Interval::OneHour,
            },
        );
        let result = indicator.calculate(&candles, &config).unwrap();
        assert_eq!(result.high_time.timestamp_millis(), NOV_14);
        assert_eq!(result.low_time.timestamp_millis(), NOV_14);
    }

    #[test]
    fn test_error_paths() {
        let indicator = indicator_at(NOV_14);
        let config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Rolling {
                periods: 5,
                interval: Interval::OneHour,
            },
        );
        assert!(matches!(
            indicator.calculate(&[], &config),
            Err(IndicatorError::EmptyInput)
        ));

        let broken = vec![candle(NOV_14, 100.0, 99.0, 98.0, 100.0)];
        assert!(matches!(
            indicator.calculate(&broken, &config),
            Err(IndicatorError::InvalidCandleData(_))
        ));

        // A custom window that misses every candle is an empty period.
        let candles = vec![candle(NOV_14, 100.0, 101.0, 99.0, 100.0)];
        let far_future = DateTime::from_timestamp_millis(NOV_14 + 1000 * HOUR).unwrap();
        let config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Custom {
                start: far_future,
                end: far_future + chrono::Duration::hours(1),
            },
        );
        assert!(matches!(
            indicator.calculate(&candles, &config),
            Err(IndicatorError::EmptyPeriod)
        ));
    }

    #[test]
    fn test_recalculation_is_deterministic() {
        let candles: Vec<Candle> = (0..6)
            .map(|i| candle(NOV_14 + i as i64 * HOUR, 100.0, 102.0 + i as f64, 98.0, 101.0))
            .collect();
        let config = HighLowConfig::new(
            "EURUSD",
            PeriodSpec::Rolling {
                periods: 6,
                interval: Interval::OneHour,
            },
        );

        let first = indicator_at(NOV_14 + 10 * HOUR)
            .calculate(&candles, &config)
            .unwrap();
        let second = indicator_at(NOV_14 + 11 * HOUR)
            .calculate(&candles, &config)
            .unwrap();

        // Identical except for the computation instant.
        assert_ne!(first.calculated_at, second.calculated_at);
        assert_eq!(first.high, second.high);
        assert_eq!(first.low, second.low);
        assert_eq!(first.high_time, second.high_time);
        assert_eq!(first.low_time, second.low_time);
        assert_eq!(first.range, second.range);
        assert_eq!(first.range_percent, second.range_percent);
        assert_eq!(first.period, second.period);
        assert_eq!(first.interval_detected, second.interval_detected);
    }
}
