//! Date/time utilities for feedmail.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::{FeedmailError, Result};

/// Text format used for every timestamp written to storage (always UTC).
pub const STORAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Encode a timestamp for storage.
pub fn to_storage_time(dt: &DateTime<Utc>) -> String {
    dt.format(STORAGE_TIME_FORMAT).to_string()
}

/// Decode a timestamp previously written with [`to_storage_time`].
pub fn from_storage_time(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, STORAGE_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| FeedmailError::internal_with(format!("invalid stored time {s:?}"), e))
}

/// Truncate a timestamp to whole seconds, the precision kept by storage.
pub fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.timestamp(), 0).unwrap_or(dt)
}

/// Parse an IANA timezone name (e.g. "Asia/Tokyo", "UTC").
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| FeedmailError::invalid_argument(format!("invalid timezone {name:?}: {e}")))
}

/// Format a datetime string to the specified timezone.
///
/// Accepts RFC3339 (as produced by the feed parser) or the storage format
/// (assumed UTC). Returns the original string if it cannot be parsed.
pub fn format_datetime(datetime_str: &str, tz: Tz, format: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return dt.with_timezone(&tz).format(format).to_string();
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(datetime_str, STORAGE_TIME_FORMAT) {
        return naive.and_utc().with_timezone(&tz).format(format).to_string();
    }

    datetime_str.to_string()
}
