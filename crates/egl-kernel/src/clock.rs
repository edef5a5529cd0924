//! RFC 3339 timestamps and expiry comparison.

use chrono::{DateTime, FixedOffset};

pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

/// `true` only when both timestamps parse and `now` is strictly after
/// `expiry`. An unparseable side never expires anything.
pub fn is_expired(expiry: &str, now: &str) -> bool {
    match (parse_timestamp(expiry), parse_timestamp(now)) {
        (Some(exp), Some(now)) => now > exp,
        _ => false,
    }
}
