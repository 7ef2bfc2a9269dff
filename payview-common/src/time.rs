//! Timestamp utilities
//!
//! Timestamps are persisted as INTEGER Unix milliseconds so that range
//! predicates in SQL compare numerically.

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a timestamp to its stored form (Unix milliseconds)
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert stored Unix milliseconds back to a UTC timestamp
///
/// Out-of-range values saturate to the Unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Convert an optional stored column to an optional timestamp
pub fn from_millis_opt(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.map(from_millis)
}

/// Convert minutes to duration
pub fn minutes_to_duration(minutes: u64) -> std::time::Duration {
    std::time::Duration::from_secs(minutes.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_millis_conversion_preserves_millisecond_precision() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
            + chrono::Duration::milliseconds(535);
        assert_eq!(from_millis(to_millis(at)), at);
    }

    #[test]
    fn test_from_millis_opt_none() {
        assert!(from_millis_opt(None).is_none());
        assert_eq!(from_millis_opt(Some(0)), Some(DateTime::<Utc>::UNIX_EPOCH));
    }

    #[test]
    fn test_minutes_to_duration() {
        assert_eq!(minutes_to_duration(0), Duration::ZERO);
        assert_eq!(minutes_to_duration(15), Duration::from_secs(900));
        assert_eq!(minutes_to_duration(1440), Duration::from_secs(86_400));
    }
}
