use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, TimeZone};

use crate::format::parse_timestamp;
use crate::models::{Row, TimeSeriesPoint};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Trailing window selected by the "change time range" control.
///
/// `Week` and `Month` both cover 30 days. The dashboard has always behaved
/// this way, so the table is kept as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TimeRange {
    Day,
    Week,
    #[default]
    Month,
}

impl TimeRange {
    pub fn window_days(self) -> i64 {
        match self {
            TimeRange::Day => 7,
            TimeRange::Week => 30,
            TimeRange::Month => 30,
        }
    }

    /// Window length for an arbitrary token; unknown tokens get 30 days.
    pub fn window_days_for_token(token: &str) -> i64 {
        token
            .parse::<TimeRange>()
            .map_or(DEFAULT_WINDOW_DAYS, TimeRange::window_days)
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(TimeRange::Day),
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            other => Err(format!("unknown time range `{other}`")),
        }
    }
}

pub fn cutoff<Tz: TimeZone>(now: &DateTime<Tz>, window_days: i64) -> DateTime<Tz> {
    now.clone() - Duration::days(window_days)
}

/// Buckets rows by calendar day using the local clock.
pub fn bucket_by_day(rows: &[Row], timestamp_field: &str, range: TimeRange) -> Vec<TimeSeriesPoint> {
    bucket_by_day_at(rows, timestamp_field, range.window_days(), &Local::now())
}

/// Counts rows stamped at or after `now - window_days`, per calendar day in
/// `now`'s zone. Rows without a readable timestamp are skipped.
pub fn bucket_by_day_at<Tz: TimeZone>(
    rows: &[Row],
    timestamp_field: &str,
    window_days: i64,
    now: &DateTime<Tz>,
) -> Vec<TimeSeriesPoint> {
    let tz = now.timezone();
    let cutoff = cutoff(now, window_days);
    let mut days: BTreeMap<String, u64> = BTreeMap::new();

    for row in rows {
        let Some(timestamp) = row
            .get(timestamp_field)
            .and_then(|value| parse_timestamp(value, &tz))
        else {
            continue;
        };

        if timestamp < cutoff {
            continue;
        }

        let date = timestamp.date_naive().format("%Y-%m-%d").to_string();
        *days.entry(date).or_insert(0) += 1;
    }

    days.into_iter()
        .map(|(date, count)| TimeSeriesPoint { date, count })
        .collect()
}
