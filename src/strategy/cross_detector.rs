//! Deterministic detection of directional level crossings.

use chrono::{DateTime, Utc};

use crate::timeutil::recent_slice;
use crate::types::{Candle, CrossDirection};

/// Recent candles inspected when no explicit lookback is configured.
pub const DEFAULT_CROSS_LOOKBACK: usize = 10;

/// Outcome of a crossing scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossResult {
    pub has_crossed: bool,
    pub direction: Option<CrossDirection>,
    pub cross_time: Option<DateTime<Utc>>,
}

impl CrossResult {
    fn quiet() -> Self {
        Self {
            has_crossed: false,
            direction: None,
            cross_time: None,
        }
    }
}

/// Scans the last `lookback` candles for the first adjacent close pair that
/// breaks `reference` in `direction`.
///
/// Equality on the previous close counts as "still on the wrong side", so a
/// close sitting exactly on the level can break on the next candle; equality
/// on the current close is not a break. Fewer than two candles never cross.
pub fn detect_cross(
    candles: &[Candle],
    reference: f64,
    direction: CrossDirection,
    lookback: usize,
) -> CrossResult {
    let recent = recent_slice(candles, lookback);
    if recent.len() < 2 {
        return CrossResult::quiet();
    }

    for pair in recent.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let crossed = match direction {
            CrossDirection::CrossOver => prev.close <= reference && curr.close > reference,
            CrossDirection::CrossUnder => prev.close >= reference && curr.close < reference,
        };
        if crossed {
            return CrossResult {
                has_crossed: true,
                direction: Some(direction),
                cross_time: Some(curr.open_time),
            };
        }
    }
    CrossResult::quiet()
}
