//! Time, interval and session utilities.
//!
//! Everything here is pure arithmetic over instants: interval tables,
//! boundary alignment, wall-clock zone translation and intraday session
//! membership. Zone translation uses a static offset table for the
//! supported zones; DST transitions are not modelled.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Effective zone used when neither the period nor the config names one.
pub const DEFAULT_TIMEZONE: &str = "America/New_York";

/// Wall-clock abstraction so period boundaries and signal timestamps are
/// testable without sleeping through midnight.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;

    fn now_ts_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Supported candle intervals with canonical durations (month = 30d nominal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    OneMinute,
    ThreeMinutes,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    FourHours,
    SixHours,
    EightHours,
    TwelveHours,
    OneDay,
    ThreeDays,
    OneWeek,
    OneMonth,
}

impl Interval {
    /// Every supported interval, shortest first.
    pub const ALL: [Interval; 15] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    /// Canonical duration in milliseconds.
    pub fn duration_ms(self) -> i64 {
        const MINUTE: i64 = 60_000;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;
        match self {
            Interval::OneMinute => MINUTE,
            Interval::ThreeMinutes => 3 * MINUTE,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::FifteenMinutes => 15 * MINUTE,
            Interval::ThirtyMinutes => 30 * MINUTE,
            Interval::OneHour => HOUR,
            Interval::TwoHours => 2 * HOUR,
            Interval::FourHours => 4 * HOUR,
            Interval::SixHours => 6 * HOUR,
            Interval::EightHours => 8 * HOUR,
            Interval::TwelveHours => 12 * HOUR,
            Interval::OneDay => DAY,
            Interval::ThreeDays => 3 * DAY,
            Interval::OneWeek => 7 * DAY,
            Interval::OneMonth => 30 * DAY,
        }
    }

    /// Wire label, passed through verbatim to venues.
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1M",
        }
    }

    /// Parses a wire label. Unknown strings fall back to one minute.
    pub fn parse(s: &str) -> Interval {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .unwrap_or(Interval::OneMinute)
    }

    /// Maps a millisecond gap to the closest supported interval.
    pub fn nearest(gap_ms: i64) -> Interval {
        Interval::ALL
            .into_iter()
            .min_by_key(|i| (i.duration_ms() - gap_ms).abs())
            .unwrap_or(Interval::OneMinute)
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::OneMinute
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Interval::parse(&s))
    }
}

/// Floors an instant to the start of its interval bucket. Idempotent.
pub fn floor_to_interval(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let dur = interval.duration_ms();
    let ms = ts.timestamp_millis();
    let floored = ms - ms.rem_euclid(dur);
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

/// Last millisecond of the interval bucket containing `ts`.
pub fn ceil_to_interval_end(ts: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let start = floor_to_interval(ts, interval);
    start + chrono::Duration::milliseconds(interval.duration_ms() - 1)
}

/// Static offset for a supported zone name, seconds east of UTC.
fn zone_offset_secs(zone: &str) -> Option<i32> {
    match zone {
        "UTC" => Some(0),
        "America/New_York" => Some(-5 * 3600),
        "Europe/London" => Some(0),
        "Asia/Tokyo" => Some(9 * 3600),
        _ => None,
    }
}

/// Translates an instant into the wall clock of a supported zone.
///
/// Unknown zones fall back to UTC with a warning. Offsets are static;
/// behaviour near DST transitions is unspecified.
pub fn convert_to_zone(ts: DateTime<Utc>, zone: &str) -> DateTime<FixedOffset> {
    let secs = zone_offset_secs(zone).unwrap_or_else(|| {
        warn!("Unknown timezone '{}', falling back to UTC", zone);
        0
    });
    let offset = FixedOffset::east_opt(secs).expect("static offset table is in range");
    ts.with_timezone(&offset)
}

/// A named intraday window defined in a timezone, e.g. the London session.
///
/// `start_minute`/`end_minute` default to 0. A session whose start is later
/// than its end wraps past midnight and covers the union of both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub start_hour: u32,
    pub end_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    #[serde(default)]
    pub end_minute: u32,
    pub timezone: Option<String>,
}

impl SessionSpec {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
            start_minute: 0,
            end_minute: 0,
            timezone: None,
        }
    }

    /// Hours must be in [0, 23] and minutes in [0, 59].
    pub fn validate(&self) -> Result<(), String> {
        if self.start_hour > 23 || self.end_hour > 23 {
            return Err(format!(
                "Session hours out of range: {}..{}",
                self.start_hour, self.end_hour
            ));
        }
        if self.start_minute > 59 || self.end_minute > 59 {
            return Err(format!(
                "Session minutes out of range: {}..{}",
                self.start_minute, self.end_minute
            ));
        }
        Ok(())
    }

    fn start_minutes(&self) -> u32 {
        self.start_hour * 60 + self.start_minute
    }

    fn end_minutes(&self) -> u32 {
        self.end_hour * 60 + self.end_minute
    }
}

/// Whether an instant falls inside the session window, evaluated on the
/// wall clock of the session's zone (or `default_zone` when unset).
pub fn is_within_session(ts: DateTime<Utc>, session: &SessionSpec, default_zone: &str) -> bool {
    let zone = session.timezone.as_deref().unwrap_or(default_zone);
    let local = convert_to_zone(ts, zone);
    let current = local.hour() * 60 + local.minute();
    let start = session.start_minutes();
    let end = session.end_minutes();

    if start <= end {
        current >= start && current <= end
    } else {
        // Wraps midnight: [start, 24h) ∪ [0, end].
        current >= start || current <= end
    }
}

/// Last `n` elements of a slice, order preserved.
pub fn recent_slice<T>(items: &[T], n: usize) -> &[T] {
    let skip = items.len().saturating_sub(n);
    &items[skip..]
}
