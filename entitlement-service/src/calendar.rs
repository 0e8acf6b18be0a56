//! Civil-date helpers for billing anniversaries and coverage windows.
//!
//! All billing dates are civil dates evaluated in one fixed UTC offset
//! configured per deployment, so "today" is stable regardless of where the
//! sweep process runs.

use anyhow::{Context, anyhow};
use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Utc};

/// Parse a fixed UTC offset of the form `+09:00` / `-05:30`.
pub fn parse_utc_offset(s: &str) -> anyhow::Result<FixedOffset> {
    let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(anyhow!("invalid UTC offset '{}', expected +HH:MM", s));
    };

    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid UTC offset '{}', expected +HH:MM", s))?;
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("invalid hours in UTC offset '{}'", s))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid minutes in UTC offset '{}'", s))?;

    if hours > 23 || minutes > 59 {
        return Err(anyhow!("UTC offset '{}' out of range", s));
    }

    let total_secs = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(total_secs).ok_or_else(|| anyhow!("UTC offset '{}' out of range", s))
}

/// Today as a civil date in the billing time zone.
pub fn today_in(offset: &FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(offset).date_naive()
}

/// Day 1 of the civil month is the billing anniversary.
pub fn is_billing_anniversary(date: NaiveDate) -> bool {
    date.day() == 1
}

/// Last day of the month containing `date`, handling year rollover.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    // First of the following month always exists.
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("first of month is always a valid date")
        - Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_positive_and_negative_offsets() {
        assert_eq!(
            parse_utc_offset("+09:00").unwrap(),
            FixedOffset::east_opt(9 * 3600).unwrap()
        );
        assert_eq!(
            parse_utc_offset("-05:30").unwrap(),
            FixedOffset::west_opt(5 * 3600 + 1800).unwrap()
        );
        assert_eq!(
            parse_utc_offset("+00:00").unwrap(),
            FixedOffset::east_opt(0).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_offsets() {
        assert!(parse_utc_offset("").is_err());
        assert!(parse_utc_offset("09:00").is_err());
        assert!(parse_utc_offset("+0900").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("+09:75").is_err());
    }

    #[test]
    fn last_day_handles_month_lengths() {
        assert_eq!(last_day_of_month(d(2025, 1, 15)), d(2025, 1, 31));
        assert_eq!(last_day_of_month(d(2025, 4, 1)), d(2025, 4, 30));
        assert_eq!(last_day_of_month(d(2025, 2, 28)), d(2025, 2, 28));
        // Leap year
        assert_eq!(last_day_of_month(d(2024, 2, 1)), d(2024, 2, 29));
    }

    #[test]
    fn last_day_handles_year_rollover() {
        assert_eq!(last_day_of_month(d(2025, 12, 1)), d(2025, 12, 31));
        assert_eq!(last_day_of_month(d(2025, 12, 31)), d(2025, 12, 31));
    }

    #[test]
    fn anniversary_is_first_of_month_only() {
        assert!(is_billing_anniversary(d(2025, 7, 1)));
        assert!(!is_billing_anniversary(d(2025, 7, 2)));
        assert!(!is_billing_anniversary(d(2025, 7, 31)));
    }
}
