//! Timestamp helpers: everything persisted is UTC ISO-8601.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Current time as `2025-08-01T12:00:00Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses an ISO-8601 timestamp, attaching UTC when the value is naive.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Rewrites a timestamp into canonical UTC ISO-8601.
///
/// Unparseable values pass through unchanged; losing one date field beats
/// failing an entire post.
pub fn normalize_timestamp(raw: &str) -> String {
    match parse_timestamp(raw) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => raw.to_string(),
    }
}
