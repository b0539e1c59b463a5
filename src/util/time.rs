//! Timestamp and duration helpers.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{BeadsError, Result};

/// Canonical storage form: RFC3339, UTC, nanosecond precision, `Z` suffix.
///
/// Fixed width, so lexical order in SQL equals chronological order.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored timestamp, accepting RFC3339 and SQLite's `datetime()` forms.
///
/// # Errors
///
/// Returns `Validation` naming `field` if no format matches.
pub fn parse_timestamp(s: &str, field: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(BeadsError::validation(
        field,
        format!("invalid timestamp '{s}'"),
    ))
}

/// Parse a duration written as `500ms`, `30s`, `5m` or `1h`. A bare number is seconds.
///
/// # Errors
///
/// Returns `Config` for unknown units or a malformed amount.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (amount, unit) = s.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| BeadsError::Config(format!("invalid duration '{s}'")))?;
    let duration = match unit.trim() {
        "ms" => Duration::from_millis(amount),
        "" | "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.saturating_mul(60)),
        "h" => Duration::from_secs(amount.saturating_mul(3600)),
        other => {
            return Err(BeadsError::Config(format!(
                "invalid duration unit '{other}' in '{s}' (use ms, s, m, h)"
            )));
        }
    };
    Ok(duration)
}

/// Render a duration in the largest unit that divides it exactly.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 != 0 {
        return format!("{millis}ms");
    }
    let secs = d.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_is_fixed_width() {
        let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let b = Utc.timestamp_opt(1_700_000_000, 5).unwrap();
        assert_eq!(format_timestamp(&a).len(), format_timestamp(&b).len());
        assert!(format_timestamp(&a) < format_timestamp(&b));
    }

    #[test]
    fn parse_accepts_sqlite_form() {
        let ts = parse_timestamp("2025-01-15 12:00:00", "created_at").unwrap();
        assert_eq!(format_timestamp(&ts), "2025-01-15T12:00:00.000000000Z");
    }

    #[test]
    fn parse_round_trips_nanos() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts), "t").unwrap(), ts);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday", "t").is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }
}
