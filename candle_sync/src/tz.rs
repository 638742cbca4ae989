//! Time zone parsing and conversion helpers for CLI edges.
//!
//! What this module provides:
//! - [`parse_ts_to_utc`]: Parse RFC-3339 timestamps with an explicit offset and convert to UTC.
//! - [`from_local_naive`]: Convert a naive local timestamp with an IANA time zone (e.g.,
//!   "America/New_York") to UTC, erroring on DST gaps and ambiguous times.
//! - [`parse_cli_time`]: Accept either of the above, or a bare date, and return epoch ms.
//! - [`ms_to_rfc3339`]: Render epoch ms for logs and reports.
//!
//! All stored times are UTC epoch milliseconds; local times only exist at the CLI.

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// RFC-3339 with offset -> UTC.
///
/// Example:
/// - "2024-03-10T09:30:00-05:00" -> "2024-03-10T14:30:00Z"
pub fn parse_ts_to_utc(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s).with_context(|| format!("bad rfc3339: {s}"))?;
    Ok(dt.with_timezone(&Utc))
}

/// Convert a naive local timestamp to UTC with a pre-parsed time zone, strictly.
pub fn from_local_naive_tz(naive: NaiveDateTime, tz: Tz) -> anyhow::Result<DateTime<Utc>> {
    use chrono::offset::LocalResult::*;
    match tz.from_local_datetime(&naive) {
        Single(dt) => Ok(dt.with_timezone(&Utc)),
        Ambiguous(..) => Err(anyhow!("ambiguous local time {naive} in {tz:?}")),
        None => Err(anyhow!("nonexistent local time {naive} in {tz:?}")),
    }
}

/// Convert a naive local timestamp to UTC by parsing an IANA time zone name.
///
/// Errors:
/// - Invalid time zone name
/// - Ambiguous or nonexistent local time
pub fn from_local_naive(naive: NaiveDateTime, tz_name: &str) -> anyhow::Result<DateTime<Utc>> {
    let tz: Tz = tz_name
        .parse()
        .map_err(|e| anyhow!("bad tz {tz_name}: {e}"))?;
    from_local_naive_tz(naive, tz)
}

/// Parse a CLI time argument into epoch milliseconds.
///
/// Accepted forms, tried in order:
/// - RFC-3339 with offset (`2024-01-01T00:00:00Z`); `tz_name` is ignored
/// - naive datetime (`2024-01-01T09:30:00` or `2024-01-01 09:30:00`) in `tz_name`
/// - bare date (`2024-01-01`), midnight in `tz_name`
pub fn parse_cli_time(s: &str, tz_name: &str) -> anyhow::Result<i64> {
    if let Ok(dt) = parse_ts_to_utc(s) {
        return Ok(dt.timestamp_millis());
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .with_context(|| format!("unrecognized time {s:?}"))?;
    Ok(from_local_naive(naive, tz_name)?.timestamp_millis())
}

/// Format epoch milliseconds as RFC-3339 UTC with millisecond precision.
pub fn ms_to_rfc3339(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => to_rfc3339_millis(dt),
        None => format!("{ms}ms"),
    }
}

/// Format a UTC datetime as an RFC-3339 string with millisecond precision.
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
