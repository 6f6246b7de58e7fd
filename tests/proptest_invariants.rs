//! Property-based tests for the quantified invariants of the engine:
//! extremum ordering, interval alignment laws, confidence bounds and
//! cross-detection consistency across many random inputs.

use chrono::DateTime;
use proptest::prelude::*;

use corrcrack::indicator::{HighLowConfig, HighLowIndicator, PeriodSpec};
use corrcrack::strategy::{confidence_score, detect_cross};
use corrcrack::timeutil::{
    ceil_to_interval_end, floor_to_interval, recent_slice, Interval,
};
use corrcrack::types::{AssetCondition, Candle, CrossDirection};

const HOUR: i64 = 3_600_000;
// 2023-11-14 00:00 UTC.
const T0: i64 = 1_699_920_000_000;

fn candle_from_prices(index: usize, prices: [f64; 4]) -> Candle {
    let mut sorted = prices;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let ms = T0 + index as i64 * HOUR;
    Candle {
        symbol: "PROP".to_string(),
        open_time: DateTime::from_timestamp_millis(ms).unwrap(),
        close_time: DateTime::from_timestamp_millis(ms + HOUR - 1).unwrap(),
        low: sorted[0],
        open: sorted[1],
        close: sorted[2],
        high: sorted[3],
        volume: 1.0,
        trades: None,
    }
}

fn candles_strategy() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec(
        prop::array::uniform4(1.0f64..1000.0),
        1..60,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, prices)| candle_from_prices(i, prices))
            .collect()
    })
}

fn interval_strategy() -> impl Strategy<Value = Interval> {
    prop::sample::select(Interval::ALL.to_vec())
}

proptest! {
    /// low <= high, range identity, and the percent identity when low > 0.
    #[test]
    fn high_low_result_is_ordered(candles in candles_strategy(), use_body in any::<bool>()) {
        let indicator = HighLowIndicator::new();
        let mut config = HighLowConfig::new(
            "PROP",
            PeriodSpec::Rolling { periods: candles.len(), interval: Interval::OneHour },
        );
        config.use_body_high_low = use_body;

        let result = indicator.calculate(&candles, &config).unwrap();
        prop_assert!(result.low <= result.high);
        prop_assert!((result.range - (result.high - result.low)).abs() < 1e-9);
        if result.low > 0.0 {
            prop_assert!(
                (result.range_percent - result.range * 100.0 / result.low).abs() < 1e-9
            );
        }
        prop_assert!(result.high_time >= candles[0].open_time);
        prop_assert!(result.low_time <= candles[candles.len() - 1].open_time);
    }

    /// Flooring is idempotent and never moves an instant forward.
    #[test]
    fn floor_to_interval_is_idempotent(
        ms in 0i64..4_000_000_000_000i64,
        interval in interval_strategy(),
    ) {
        let ts = DateTime::from_timestamp_millis(ms).unwrap();
        let floored = floor_to_interval(ts, interval);
        prop_assert!(floored <= ts);
        prop_assert_eq!(floor_to_interval(floored, interval), floored);
        prop_assert_eq!(floored.timestamp_millis() % interval.duration_ms(), 0);

        // The bucket end sits one interval minus a millisecond after the start.
        let end = ceil_to_interval_end(ts, interval);
        prop_assert_eq!(
            end.timestamp_millis() - floored.timestamp_millis(),
            interval.duration_ms() - 1
        );
    }

    /// Confidence lands in [0, 1] for any held set.
    #[test]
    fn confidence_is_bounded(
        prices in prop::collection::vec((0.0001f64..10_000.0, 0.0001f64..10_000.0), 0..8),
    ) {
        let held: Vec<AssetCondition> = prices
            .iter()
            .enumerate()
            .map(|(i, (price, reference))| AssetCondition {
                symbol: format!("A{}", i),
                has_crossed: false,
                cross_direction: None,
                current_price: *price,
                reference_level: *reference,
                cross_time: None,
            })
            .collect();
        let refs: Vec<&AssetCondition> = held.iter().collect();

        let score = confidence_score(&refs);
        prop_assert!((0.0..=1.0).contains(&score), "confidence out of range: {}", score);
    }

    /// A reported crossing always carries a cross time belonging to one of
    /// the scanned candles, and a series entirely on the safe side never
    /// crosses.
    #[test]
    fn cross_detection_is_consistent(
        closes in prop::collection::vec(50.0f64..150.0, 0..30),
        reference in 50.0f64..150.0,
        lookback in 1usize..20,
    ) {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| candle_from_prices(i, [c, c + 0.5, c - 0.5, c]))
            .collect();

        let result = detect_cross(&candles, reference, CrossDirection::CrossUnder, lookback);
        if result.has_crossed {
            prop_assert_eq!(result.direction, Some(CrossDirection::CrossUnder));
            let time = result.cross_time.unwrap();
            prop_assert!(candles.iter().any(|c| c.open_time == time));
        } else {
            prop_assert_eq!(result.cross_time, None);
        }

        // Everything strictly above the level: cross-under cannot fire.
        let above: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let c = reference + 1.0 + c;
                candle_from_prices(i, [c, c + 0.5, c - 0.5, c])
            })
            .collect();
        prop_assert!(
            !detect_cross(&above, reference, CrossDirection::CrossUnder, lookback).has_crossed
        );
    }

    /// recent_slice returns the suffix, bounded by the requested length.
    #[test]
    fn recent_slice_is_a_bounded_suffix(
        items in prop::collection::vec(any::<i32>(), 0..50),
        n in 0usize..60,
    ) {
        let slice = recent_slice(&items, n);
        prop_assert_eq!(slice.len(), n.min(items.len()));
        prop_assert_eq!(slice, &items[items.len() - slice.len()..]);
    }
}
