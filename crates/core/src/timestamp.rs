//! Event-time parsing.
//!
//! Producers do not agree on a single ISO-8601 rendering, so the accepted
//! forms are tried in order until one parses:
//!
//! 1. RFC 3339 (`2024-01-01T00:00:00Z`, `2024-01-01T00:00:00+02:00`)
//! 2. RFC 3339 with fractional seconds (`2024-01-01T00:00:00.123456789Z`)
//! 3. `YYYY-MM-DDTHH:MM:SSZ`
//! 4. `YYYY-MM-DDTHH:MM:SS.sssZ`
//! 5. `YYYY-MM-DD HH:MM:SS` (interpreted as UTC)
//!
//! ```
//! use auditlog_core::timestamp::parse_event_timestamp;
//!
//! let ts = parse_event_timestamp("2024-01-01 08:30:00").unwrap();
//! assert_eq!(ts.to_rfc3339(), "2024-01-01T08:30:00+00:00");
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::CoreError;
use crate::types::Timestamp;

/// Layouts without an offset, all interpreted as UTC.
const NAIVE_LAYOUTS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.3fZ",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a producer-supplied timestamp into UTC.
///
/// RFC 3339 covers both the plain and the fractional-seconds variants;
/// the remaining layouts are tried afterwards in order.
pub fn parse_event_timestamp(raw: &str) -> Result<Timestamp, CoreError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CoreError::InvalidTimestamp(raw.to_string()))
}
