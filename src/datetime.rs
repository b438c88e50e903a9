//! Conversions between naive calendar values and [`Ms`].
//!
//! All timestamps live in one implicit timezone; nothing here looks at offsets.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::Ms;

/// Form timestamp, minute precision: `2025-12-10T14:30`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M";
/// Report date: `2025-12-10`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TIMESTAMP_LEN: usize = 16;
const DATE_LEN: usize = 10;

pub const MS_PER_DAY: Ms = 86_400_000;

pub fn to_ms(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

pub fn from_ms(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Local wall-clock time, in the same implicit timezone as stored timestamps.
pub fn now_ms() -> Ms {
    to_ms(Local::now().naive_local())
}

/// Parse exactly `YYYY-MM-DDTHH:MM`. Seconds, offsets and short fields are rejected.
pub fn parse_timestamp(value: &str) -> Option<Ms> {
    if value.len() != TIMESTAMP_LEN {
        return None;
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(to_ms)
}

/// Parse exactly `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != DATE_LEN {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

/// First millisecond of `date`.
pub fn start_of_day(date: NaiveDate) -> Ms {
    to_ms(date.and_time(NaiveTime::MIN))
}

/// Last representable millisecond of `date` (23:59:59.999).
pub fn end_of_day(date: NaiveDate) -> Ms {
    start_of_day(date) + MS_PER_DAY - 1
}

/// `2025-01-01 10:00:00`, used in human-readable messages.
pub fn display(ms: Ms) -> String {
    format_with(ms, DISPLAY_FORMAT)
}

/// Inverse of [`parse_timestamp`] for whole-minute values.
pub fn format_timestamp(ms: Ms) -> String {
    format_with(ms, TIMESTAMP_FORMAT)
}

fn format_with(ms: Ms, fmt: &str) -> String {
    match from_ms(ms) {
        Some(dt) => dt.format(fmt).to_string(),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_form_timestamp() {
        let ms = parse_timestamp("2025-01-01T10:00").unwrap();
        let midnight = parse_timestamp("2025-01-01T00:00").unwrap();
        assert_eq!(ms - midnight, 10 * 3_600_000);
        assert_eq!(format_timestamp(ms), "2025-01-01T10:00");
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2025-01-01"), None);
        assert_eq!(parse_timestamp("2025-01-01T10:00:00"), None);
        assert_eq!(parse_timestamp("2025-01-01 10:00"), None);
        assert_eq!(parse_timestamp("2025-01-01T10:00Z"), None);
        assert_eq!(parse_timestamp("2025-13-01T10:00"), None);
        assert_eq!(parse_timestamp("2025-02-30T10:00"), None);
        assert_eq!(parse_timestamp("2025-01-01T24:00"), None);
    }

    #[test]
    fn parses_date() {
        assert!(parse_date("2025-01-31").is_some());
        assert!(parse_date("2025-1-31").is_none());
        assert!(parse_date("2025-01-31T00:00").is_none());
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn day_bounds() {
        let date = parse_date("2025-01-01").unwrap();
        let start = start_of_day(date);
        let end = end_of_day(date);
        assert_eq!(start, parse_timestamp("2025-01-01T00:00").unwrap());
        assert_eq!(end + 1, parse_timestamp("2025-01-02T00:00").unwrap());
        assert_eq!(display(end), "2025-01-01 23:59:59");
    }

    #[test]
    fn display_format() {
        let ms = parse_timestamp("2025-06-30T09:05").unwrap();
        assert_eq!(display(ms), "2025-06-30 09:05:00");
    }
}
