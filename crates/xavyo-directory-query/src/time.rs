//! Date arithmetic and Windows FileTime conversion.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};

/// 100-nanosecond intervals between 1601-01-01 and 1970-01-01 (UTC).
pub const FILETIME_UNIX_EPOCH_OFFSET: i64 = 116_444_736_000_000_000;

/// FileTime ticks per millisecond.
const TICKS_PER_MILLI: i64 = 10_000;

/// Largest FileTime AD uses to mean "never" (e.g. `accountExpires`).
pub const FILETIME_NEVER: i64 = i64::MAX;

/// Current time minus `days` days, or `None` if out of range.
#[must_use]
pub fn days_to_date(days: f64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(millis_duration(days * 86_400_000.0)?)
}

/// Current time minus `hours` hours, or `None` if out of range.
#[must_use]
pub fn hours_to_date(hours: f64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(millis_duration(hours * 3_600_000.0)?)
}

fn millis_duration(millis: f64) -> Option<Duration> {
    // Fractional milliseconds are truncated, like JavaScript Date arithmetic.
    let millis = millis.trunc();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

/// Convert an instant to a Windows FileTime (100-ns ticks since 1601-01-01 UTC).
///
/// Precision is milliseconds, matching the precision of the source instant.
/// Returns `None` when the instant does not fit in a FileTime.
#[must_use]
pub fn to_file_time(instant: DateTime<Utc>) -> Option<i64> {
    instant
        .timestamp_millis()
        .checked_mul(TICKS_PER_MILLI)?
        .checked_add(FILETIME_UNIX_EPOCH_OFFSET)
}

/// Convert a Windows FileTime to an instant.
///
/// Returns `None` for `0` and the "never" sentinel, which AD uses for
/// attributes that were never set.
#[must_use]
pub fn from_file_time(file_time: i64) -> Option<DateTime<Utc>> {
    if file_time <= 0 || file_time == FILETIME_NEVER {
        return None;
    }
    let unix_millis = (file_time - FILETIME_UNIX_EPOCH_OFFSET) / TICKS_PER_MILLI;
    Utc.timestamp_millis_opt(unix_millis).single()
}

/// Parse a FileTime stored as a decimal string.
#[must_use]
pub fn parse_file_time(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim().parse::<i64>().ok().and_then(from_file_time)
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
#[must_use]
pub fn format_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// LDAP generalized time, as used by `whenCreated`/`whenChanged`.
#[must_use]
pub fn format_generalized_time(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M%S.0Z").to_string()
}

/// Parse an LDAP generalized time such as `20240102030405.0Z`.
#[must_use]
pub fn parse_generalized_time(raw: &str) -> Option<DateTime<Utc>> {
    let digits = raw.get(..14)?;
    chrono::NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a timestamp in any of the formats directories return.
///
/// Accepts RFC 3339, LDAP generalized time and FileTime integers.
#[must_use]
pub fn parse_any_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if raw.len() >= 15 && raw.ends_with('Z') && raw.as_bytes()[..14].iter().all(u8::is_ascii_digit) {
        return parse_generalized_time(raw);
    }
    if raw.len() >= 17 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return parse_file_time(raw);
    }
    None
}
