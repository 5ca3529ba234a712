// Date and time handling
//
// ISO 8601 parsing and formatting behind $now, $millis, $fromMillis and
// $toMillis. The evaluator captures one timestamp per evaluation; this
// module only converts.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::Error;

/// Format a datetime as ISO 8601 with millisecond precision.
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Milliseconds since the epoch to an ISO 8601 string.
pub fn millis_to_iso8601(millis: i64) -> Result<String, Error> {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => Ok(format_iso8601(&dt)),
        None => Err(Error::CastToNumberFailed {
            value: millis.to_string(),
        }),
    }
}

/// Parse an ISO 8601 string to milliseconds since the epoch.
pub fn iso8601_to_millis(s: &str) -> Result<i64, Error> {
    s.parse::<DateTime<Utc>>()
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| Error::CastToNumberFailed {
            value: s.to_string(),
        })
}
