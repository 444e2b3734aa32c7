pub mod batch;
pub mod blob;
pub mod preset;
pub mod pricing;
pub mod query;
pub mod relational;
pub mod score;
pub mod signal;
pub mod span;
pub mod trace;

use crate::error::{CoreError, CoreResult};

/// Parse an RFC 3339 timestamp into i64 nanoseconds since epoch.
pub fn rfc3339_to_nanos(value: &str) -> CoreResult<i64> {
    let dt = chrono::DateTime::parse_from_rfc3339(value)
        .map_err(|e| CoreError::Validation(format!("bad timestamp {value:?}: {e}")))?;
    dt.timestamp_nanos_opt()
        .ok_or_else(|| CoreError::Validation(format!("timestamp {value:?} out of range")))
}

/// Convert nanoseconds since epoch to a human-readable UTC timestamp string.
pub fn nanos_to_string(nanos: i64) -> String {
    let secs = nanos.div_euclid(1_000_000_000);
    let subsec_nanos = nanos.rem_euclid(1_000_000_000) as u32;
    chrono::DateTime::from_timestamp(secs, subsec_nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string())
        .unwrap_or_else(|| nanos.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_to_nanos() {
        let n = rfc3339_to_nanos("2026-01-02T03:04:05.5Z").unwrap();
        assert_eq!(n % 1_000_000_000, 500_000_000);
    }

    #[test]
    fn test_rfc3339_rejects_garbage() {
        assert!(rfc3339_to_nanos("not-a-time").is_err());
    }

    #[test]
    fn test_nanos_to_string() {
        let n = rfc3339_to_nanos("2026-01-02T03:04:05Z").unwrap();
        assert_eq!(nanos_to_string(n), "2026-01-02 03:04:05.000000000");
    }
}
