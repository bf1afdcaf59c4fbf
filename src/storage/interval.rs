//! Interval expressions
//!
//! Parses the PostgreSQL-style interval strings accepted by the configuration
//! endpoint ("1 hours", "30 days", "1 day 12 hours") and renders durations back
//! the way PostgreSQL prints them ("01:00:00", "30 days", "1 day 12:00:00").
//! Months count as 30 days and years as 365 days.

use chrono::Duration;
use regex::Regex;
use std::sync::OnceLock;

use crate::storage::error::{StorageError, StorageResult};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// Longest accepted interval: 10,000 years of 365 days
pub const MAX_INTERVAL_MICROS: i64 = 10_000 * 365 * MICROS_PER_DAY;

fn term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*([a-z]+)\s*").expect("interval regex is valid")
    })
}

fn clock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\d+):(\d{2}):(\d{2})(?:\.(\d{1,6}))?\s*").expect("clock regex is valid")
    })
}

fn unit_micros(unit: &str) -> Option<i64> {
    let micros = match unit.to_lowercase().as_str() {
        "us" | "usec" | "usecs" | "microsecond" | "microseconds" => 1,
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1_000,
        "s" | "sec" | "secs" | "second" | "seconds" => MICROS_PER_SECOND,
        "m" | "min" | "mins" | "minute" | "minutes" => 60 * MICROS_PER_SECOND,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600 * MICROS_PER_SECOND,
        "d" | "day" | "days" => MICROS_PER_DAY,
        "w" | "week" | "weeks" => 7 * MICROS_PER_DAY,
        "mon" | "mons" | "month" | "months" => 30 * MICROS_PER_DAY,
        "y" | "year" | "years" => 365 * MICROS_PER_DAY,
        _ => return None,
    };
    Some(micros)
}

/// Parse an interval expression into a positive duration
pub fn parse_interval(input: &str) -> StorageResult<Duration> {
    let invalid = || StorageError::InvalidInterval(input.to_string());

    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: i64 = 0;
    while !rest.is_empty() {
        if let Some(caps) = clock_regex().captures(rest) {
            let hours: i64 = caps[1].parse().map_err(|_| invalid())?;
            let minutes: i64 = caps[2].parse().map_err(|_| invalid())?;
            let seconds: i64 = caps[3].parse().map_err(|_| invalid())?;
            let fraction = caps
                .get(4)
                .map(|m| format!("{:0<6}", m.as_str()).parse::<i64>())
                .transpose()
                .map_err(|_| invalid())?
                .unwrap_or(0);
            let clock = hours
                .checked_mul(3_600)
                .and_then(|s| s.checked_add(minutes * 60 + seconds))
                .and_then(|s| s.checked_mul(MICROS_PER_SECOND))
                .and_then(|us| us.checked_add(fraction))
                .ok_or_else(invalid)?;
            total = total.checked_add(clock).ok_or_else(invalid)?;
            rest = &rest[caps[0].len()..];
            continue;
        }

        let caps = term_regex().captures(rest).ok_or_else(invalid)?;
        let amount: f64 = caps[1].parse().map_err(|_| invalid())?;
        let unit = unit_micros(&caps[2]).ok_or_else(invalid)?;
        let micros = (amount * unit as f64).round();
        if !micros.is_finite() || micros > MAX_INTERVAL_MICROS as f64 {
            return Err(invalid());
        }
        total = total.checked_add(micros as i64).ok_or_else(invalid)?;
        rest = &rest[caps[0].len()..];
    }

    if total <= 0 || total > MAX_INTERVAL_MICROS {
        return Err(invalid());
    }

    Ok(Duration::microseconds(total))
}

/// Render a duration the way PostgreSQL prints an interval
pub fn format_interval(duration: Duration) -> String {
    let micros = duration.num_microseconds().unwrap_or(i64::MAX);
    let days = micros / MICROS_PER_DAY;
    let rem = micros % MICROS_PER_DAY;

    let mut parts = Vec::new();
    if days != 0 {
        let unit = if days.abs() == 1 { "day" } else { "days" };
        parts.push(format!("{} {}", days, unit));
    }

    if rem != 0 || days == 0 {
        let secs = rem / MICROS_PER_SECOND;
        let frac = rem % MICROS_PER_SECOND;
        let mut clock = format!("{:02}:{:02}:{:02}", secs / 3_600, (secs % 3_600) / 60, secs % 60);
        if frac != 0 {
            let digits = format!("{:06}", frac);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_interval("1 hours").unwrap(), Duration::hours(1));
        assert_eq!(parse_interval("30 days").unwrap(), Duration::days(30));
        assert_eq!(parse_interval("90 minutes").unwrap(), Duration::minutes(90));
        assert_eq!(parse_interval("2 weeks").unwrap(), Duration::days(14));
        assert_eq!(parse_interval("1 month").unwrap(), Duration::days(30));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(
            parse_interval("1 day 12 hours").unwrap(),
            Duration::hours(36)
        );
        assert_eq!(
            parse_interval("1 day 02:30:00").unwrap(),
            Duration::minutes(24 * 60 + 150)
        );
        assert_eq!(parse_interval("0.5 hours").unwrap(), Duration::minutes(30));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("3 fortnights").is_err());
        assert!(parse_interval("hours").is_err());
        assert!(parse_interval("0 days").is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert_eq!(
            parse_interval("10000 years").unwrap(),
            Duration::microseconds(MAX_INTERVAL_MICROS)
        );
        assert!(parse_interval("10001 years").is_err());
        assert!(parse_interval("280000 years").is_err());
        assert!(parse_interval("200000 years 200000 years").is_err());
        assert!(parse_interval("6000 years 6000 years").is_err());
        assert!(parse_interval("99999999999999999 hours").is_err());
        assert!(parse_interval("9999999999999999:00:00").is_err());
        assert!(parse_interval("1e400 days").is_err());
    }

    #[test]
    fn test_format_matches_postgres() {
        assert_eq!(format_interval(Duration::hours(1)), "01:00:00");
        assert_eq!(format_interval(Duration::days(30)), "30 days");
        assert_eq!(format_interval(Duration::days(1)), "1 day");
        assert_eq!(format_interval(Duration::hours(36)), "1 day 12:00:00");
        assert_eq!(format_interval(Duration::milliseconds(1500)), "00:00:01.5");
    }
}
