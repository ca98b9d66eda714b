//! ISO-8601 timestamp parsing for token lifetimes.
//!
//! Keystone servers are inconsistent about zones: `expires` usually carries a `Z`,
//! while `issued_at` is often written without any offset. Timestamps without an
//! offset are read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an ISO-8601 timestamp, with or without a zone offset.
///
/// Returns `None` if the string is not a recognizable timestamp.
///
/// # Examples
///
/// ```
/// use iron_core::timestamp;
///
/// let a = timestamp::parse("2013-02-27T18:30:59Z").unwrap();
/// let b = timestamp::parse("2013-02-26T18:30:59.999999").unwrap();
/// assert!(a > b);
/// ```
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
