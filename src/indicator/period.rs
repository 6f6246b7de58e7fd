//! Period specifications and the resolver mapping them onto candle filters.
//!
//! A `PeriodSpec` names the reference window: a calendar period, a plain
//! interval, an explicit range, a rolling window or an intraday session.
//! Calendar boundaries are evaluated on the wall clock of the effective
//! zone. Weeks begin on Monday.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::timeutil::{
    convert_to_zone, is_within_session, recent_slice, Interval, SessionSpec, DEFAULT_TIMEZONE,
};
use crate::types::Candle;

/// Candles fetched for a plain-interval or session period.
const STANDARD_WINDOW: usize = 100;

/// Upper bound on candles requested for a custom range.
const CUSTOM_FETCH_CAP: usize = 1000;

/// Named calendar windows, evaluated in the effective zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarPeriod {
    PrevDay,
    PrevWeek,
    PrevMonth,
    CurrentDay,
    CurrentWeek,
    CurrentMonth,
}

impl CalendarPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            CalendarPeriod::PrevDay => "prev_day",
            CalendarPeriod::PrevWeek => "prev_week",
            CalendarPeriod::PrevMonth => "prev_month",
            CalendarPeriod::CurrentDay => "current_day",
            CalendarPeriod::CurrentWeek => "current_week",
            CalendarPeriod::CurrentMonth => "current_month",
        }
    }
}

impl std::str::FromStr for CalendarPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prev_day" => Ok(CalendarPeriod::PrevDay),
            "prev_week" => Ok(CalendarPeriod::PrevWeek),
            "prev_month" => Ok(CalendarPeriod::PrevMonth),
            "current_day" => Ok(CalendarPeriod::CurrentDay),
            "current_week" => Ok(CalendarPeriod::CurrentWeek),
            "current_month" => Ok(CalendarPeriod::CurrentMonth),
            _ => Err(format!("Unknown calendar period: {}", s)),
        }
    }
}

/// The reference window over which high/low levels are computed.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodSpec {
    Calendar(CalendarPeriod),
    /// Plain interval: no temporal filter, most recent candles win.
    Standard(Interval),
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Rolling {
        periods: usize,
        interval: Interval,
    },
    Session(SessionSpec),
}

impl PeriodSpec {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PeriodSpec::Custom { start, end } if end < start => {
                Err(format!("custom period ends before it starts: {} > {}", start, end))
            }
            PeriodSpec::Rolling { periods: 0, .. } => {
                Err("rolling period needs at least one candle".to_string())
            }
            PeriodSpec::Session(session) => session.validate(),
            _ => Ok(()),
        }
    }

    /// Serialised form carried on indicator results.
    pub fn label(&self) -> String {
        match self {
            PeriodSpec::Calendar(cal) => cal.as_str().to_string(),
            PeriodSpec::Standard(interval) => interval.to_string(),
            PeriodSpec::Custom { start, end } => {
                format!("custom:{}..{}", start.to_rfc3339(), end.to_rfc3339())
            }
            PeriodSpec::Rolling { periods, interval } => {
                format!("rolling:{}x{}", periods, interval)
            }
            PeriodSpec::Session(s) => format!(
                "session:{:02}:{:02}-{:02}:{:02}@{}",
                s.start_hour,
                s.start_minute,
                s.end_hour,
                s.end_minute,
                s.timezone.as_deref().unwrap_or("default")
            ),
        }
    }

    /// Recommended fetch parameters for covering this period.
    pub fn fetch_plan(&self) -> FetchPlan {
        match self {
            PeriodSpec::Calendar(CalendarPeriod::PrevDay | CalendarPeriod::CurrentDay) => {
                FetchPlan::new(Interval::OneHour, 48)
            }
            PeriodSpec::Calendar(CalendarPeriod::PrevWeek | CalendarPeriod::CurrentWeek) => {
                FetchPlan::new(Interval::FourHours, 84)
            }
            PeriodSpec::Calendar(CalendarPeriod::PrevMonth | CalendarPeriod::CurrentMonth) => {
                FetchPlan::new(Interval::OneDay, 62)
            }
            PeriodSpec::Rolling { periods, interval } => FetchPlan::new(*interval, *periods),
            PeriodSpec::Custom { start, end } => {
                let hours = ((*end - *start).num_milliseconds() as f64 / 3_600_000.0).ceil();
                FetchPlan::new(
                    Interval::OneHour,
                    (hours as usize).clamp(1, CUSTOM_FETCH_CAP),
                )
            }
            PeriodSpec::Standard(_) | PeriodSpec::Session(_) => {
                FetchPlan::new(Interval::OneHour, STANDARD_WINDOW)
            }
        }
    }
}

/// Fetch parameters recommended by the resolver for a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub interval: Interval,
    pub limit: usize,
}

impl FetchPlan {
    fn new(interval: Interval, limit: usize) -> Self {
        Self { interval, limit }
    }
}

/// Zone precedence: the period's own zone, then the config zone, then the
/// default.
pub fn effective_zone(period: &PeriodSpec, config_zone: Option<&str>) -> String {
    if let PeriodSpec::Session(session) = period {
        if let Some(zone) = &session.timezone {
            return zone.clone();
        }
    }
    config_zone.unwrap_or(DEFAULT_TIMEZONE).to_string()
}

/// Applies the period filter, preserving ascending order. Applying the
/// same filter to its own output is the identity.
pub fn filter_candles(
    candles: &[Candle],
    period: &PeriodSpec,
    zone: &str,
    now: DateTime<Utc>,
) -> Vec<Candle> {
    match period {
        PeriodSpec::Calendar(cal) => {
            let (start, end) = calendar_bounds(*cal, zone, now);
            candles
                .iter()
                .filter(|c| c.open_time >= start && end.map_or(true, |e| c.open_time <= e))
                .cloned()
                .collect()
        }
        PeriodSpec::Standard(_) => recent_slice(candles, STANDARD_WINDOW).to_vec(),
        PeriodSpec::Custom { start, end } => candles
            .iter()
            .filter(|c| c.open_time >= *start && c.open_time <= *end)
            .cloned()
            .collect(),
        PeriodSpec::Rolling { periods, .. } => recent_slice(candles, *periods).to_vec(),
        PeriodSpec::Session(session) => candles
            .iter()
            .filter(|c| is_within_session(c.open_time, session, zone))
            .cloned()
            .collect(),
    }
}

/// Start instant (inclusive) and optional end instant (inclusive) of a
/// calendar period, on the wall clock of `zone`.
fn calendar_bounds(
    cal: CalendarPeriod,
    zone: &str,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
    let local = convert_to_zone(now, zone);
    let today = local.date_naive();
    let offset = *local.offset();

    let day_start = |date: NaiveDate| -> DateTime<Utc> {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists on every date");
        DateTime::<Utc>::from_naive_utc_and_offset(naive - offset, Utc)
    };
    let just_before = |instant: DateTime<Utc>| instant - chrono::Duration::milliseconds(1);

    match cal {
        CalendarPeriod::PrevDay => {
            let yesterday = today.pred_opt().expect("calendar range is sane");
            (day_start(yesterday), Some(just_before(day_start(today))))
        }
        CalendarPeriod::CurrentDay => (day_start(today), None),
        CalendarPeriod::PrevWeek | CalendarPeriod::CurrentWeek => {
            // Weeks begin Monday; Sunday sits six days in.
            let days_into_week = today.weekday().num_days_from_monday() as i64;
            let monday = today - chrono::Duration::days(days_into_week);
            if cal == CalendarPeriod::CurrentWeek {
                (day_start(monday), None)
            } else {
                let prev_monday = monday - chrono::Duration::days(7);
                (day_start(prev_monday), Some(just_before(day_start(monday))))
            }
        }
        CalendarPeriod::PrevMonth | CalendarPeriod::CurrentMonth => {
            let first_of_month = today
                .with_day(1)
                .expect("every month has a first day");
            if cal == CalendarPeriod::CurrentMonth {
                (day_start(first_of_month), None)
            } else {
                let (year, month) = match first_of_month.month() {
                    1 => (first_of_month.year() - 1, 12),
                    m => (first_of_month.year(), m - 1),
                };
                let first_of_prev = NaiveDate::from_ymd_opt(year, month, 1)
                    .expect("previous month exists");
                (
                    day_start(first_of_prev),
                    Some(just_before(day_start(first_of_month))),
                )
            }
        }
    }
}
