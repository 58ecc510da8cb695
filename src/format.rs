use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

pub const DEFAULT_TRUNCATE_LENGTH: usize = 50;
pub const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateFormat {
    #[default]
    Date,
    DateTime,
    Time,
}

impl DateFormat {
    fn pattern(self) -> &'static str {
        match self {
            DateFormat::Date => "%Y-%m-%d",
            DateFormat::DateTime => "%Y-%m-%d %H:%M:%S",
            DateFormat::Time => "%H:%M:%S",
        }
    }
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date" => Ok(DateFormat::Date),
            "datetime" => Ok(DateFormat::DateTime),
            "time" => Ok(DateFormat::Time),
            other => Err(format!("unknown date format `{other}`")),
        }
    }
}

/// Cuts `text` to `max_length` characters and appends `...`; shorter text
/// passes through untouched.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_length).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Like [`truncate_text`], but anything other than a JSON string gives `""`.
pub fn truncate_value(value: &Value, max_length: usize) -> String {
    match value {
        Value::String(text) => truncate_text(text, max_length),
        _ => String::new(),
    }
}

/// Reads a timestamp out of a row value.
///
/// Strings may be RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]` or
/// `YYYY-MM-DD HH:MM:SS` (both read as wall time in `tz`), or a bare
/// `YYYY-MM-DD` (UTC midnight). Numbers are epoch milliseconds.
pub fn parse_timestamp<Tz: TimeZone>(value: &Value, tz: &Tz) -> Option<DateTime<Tz>> {
    match value {
        Value::String(text) => parse_timestamp_str(text.trim(), tz),
        Value::Number(number) => {
            let millis = number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64))?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(|utc| utc.with_timezone(tz))
        }
        _ => None,
    }
}

fn parse_timestamp_str<Tz: TimeZone>(text: &str, tz: &Tz) -> Option<DateTime<Tz>> {
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(tz));
    }

    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
            return tz.from_local_datetime(&naive).earliest();
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).with_timezone(tz))
}

/// Formats a date-like value in local time; unparseable input gives `""`.
pub fn format_date(value: &Value, format: DateFormat) -> String {
    format_date_in(value, format, &Local)
}

/// A zero timestamp counts as "no date" and formats as `""`.
pub fn format_date_in<Tz>(value: &Value, format: DateFormat, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if value.as_f64() == Some(0.0) {
        return String::new();
    }
    parse_timestamp(value, tz)
        .map(|timestamp| timestamp.format(format.pattern()).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    #[test]
    fn short_text_passes_through() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello", 5), "hello");
    }

    #[test]
    fn long_text_gets_ellipsis() {
        let text = "a".repeat(60);
        let truncated = truncate_text(&text, DEFAULT_TRUNCATE_LENGTH);
        assert_eq!(truncated.chars().count(), 53);
        assert!(truncated.ends_with(ELLIPSIS));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_text("番茄炒蛋很好吃", 4), "番茄炒蛋...");
    }

    #[test]
    fn non_string_truncates_to_empty() {
        assert_eq!(truncate_value(&json!(42), 10), "");
        assert_eq!(truncate_value(&Value::Null, 10), "");
        assert_eq!(truncate_value(&json!("soup"), 10), "soup");
    }

    #[test]
    fn formats_each_mode_zero_padded() {
        let value = json!("2024-03-05T07:08:09Z");
        assert_eq!(format_date_in(&value, DateFormat::Date, &Utc), "2024-03-05");
        assert_eq!(
            format_date_in(&value, DateFormat::DateTime, &Utc),
            "2024-03-05 07:08:09"
        );
        assert_eq!(format_date_in(&value, DateFormat::Time, &Utc), "07:08:09");
    }

    #[test]
    fn formats_in_the_given_zone() {
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        let value = json!("2024-03-05T20:00:00Z");
        assert_eq!(
            format_date_in(&value, DateFormat::DateTime, &shanghai),
            "2024-03-06 04:00:00"
        );
    }

    #[test]
    fn invalid_dates_format_to_empty() {
        assert_eq!(format_date_in(&json!("not a date"), DateFormat::Date, &Utc), "");
        assert_eq!(format_date_in(&json!(""), DateFormat::Date, &Utc), "");
        assert_eq!(format_date_in(&Value::Null, DateFormat::Date, &Utc), "");
        assert_eq!(format_date_in(&json!(true), DateFormat::Date, &Utc), "");
    }

    #[test]
    fn zero_timestamp_formats_to_empty() {
        assert_eq!(format_date(&json!(0), DateFormat::Date), "");
        assert_eq!(format_date_in(&json!(0.0), DateFormat::DateTime, &Utc), "");
    }

    #[test]
    fn epoch_millis_are_accepted() {
        let value = json!(86_400_000);
        assert_eq!(format_date_in(&value, DateFormat::Date, &Utc), "1970-01-02");
    }

    #[test]
    fn parses_postgres_style_timestamps() {
        let parsed = parse_timestamp(&json!("2024-01-05 10:30:00"), &Utc).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-05T10:30:00+00:00");
        let parsed = parse_timestamp(&json!("2024-01-05T10:30:00.123456"), &Utc).unwrap();
        assert_eq!(parsed.format("%H:%M:%S").to_string(), "10:30:00");
    }

    #[test]
    fn date_format_from_token() {
        assert_eq!("datetime".parse::<DateFormat>(), Ok(DateFormat::DateTime));
        assert!("week".parse::<DateFormat>().is_err());
    }
}
