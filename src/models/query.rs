use clickhouse::Row;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Time-range parameters accepted on the HTTP surface: either a preset
/// keyword or an explicit `from`+`to` pair in RFC 3339 (both required
/// together, `to` strictly after `from`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeRangeParams {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// A resolved half-open window `[from, to]` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: chrono::DateTime<chrono::Utc>,
    pub to: chrono::DateTime<chrono::Utc>,
}

impl TimeWindow {
    pub fn from_rfc3339(&self) -> String {
        self.from.to_rfc3339()
    }

    pub fn to_rfc3339(&self) -> String {
        self.to.to_rfc3339()
    }
}

const PRESETS: &[(&str, i64)] = &[
    ("15m", 15 * 60),
    ("30m", 30 * 60),
    ("1h", 3_600),
    ("3h", 3 * 3_600),
    ("6h", 6 * 3_600),
    ("12h", 12 * 3_600),
    ("24h", 24 * 3_600),
    ("7d", 7 * 86_400),
    ("14d", 14 * 86_400),
    ("30d", 30 * 86_400),
];

impl TimeRangeParams {
    /// Resolve to a concrete window relative to `now`.
    pub fn resolve(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<TimeWindow> {
        if let Some(preset) = self.preset.as_deref() {
            let secs = PRESETS
                .iter()
                .find(|(name, _)| *name == preset)
                .map(|(_, secs)| *secs)
                .ok_or_else(|| {
                    CoreError::Validation(format!("unknown time range preset {preset:?}"))
                })?;
            return Ok(TimeWindow {
                from: now - chrono::Duration::seconds(secs),
                to: now,
            });
        }
        match (self.from.as_deref(), self.to.as_deref()) {
            (Some(from), Some(to)) => {
                let from = chrono::DateTime::parse_from_rfc3339(from)
                    .map_err(|e| CoreError::Validation(format!("bad from {from:?}: {e}")))?
                    .with_timezone(&chrono::Utc);
                let to = chrono::DateTime::parse_from_rfc3339(to)
                    .map_err(|e| CoreError::Validation(format!("bad to {to:?}: {e}")))?
                    .with_timezone(&chrono::Utc);
                if to <= from {
                    return Err(CoreError::Validation(
                        "to must be after from".to_string(),
                    ));
                }
                Ok(TimeWindow { from, to })
            }
            (None, None) => Err(CoreError::Validation(
                "time range requires a preset or from+to".to_string(),
            )),
            _ => Err(CoreError::Validation(
                "from and to are required together".to_string(),
            )),
        }
    }
}

/// Time-series bucket keywords (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketInterval {
    Hour,
    Day,
    Week,
}

impl BucketInterval {
    /// The store-native bucketing function applied to a DateTime column.
    pub fn truncate_fn(self, column: &str) -> String {
        match self {
            BucketInterval::Hour => format!("toStartOfHour({column})"),
            BucketInterval::Day => format!("toStartOfDay({column})"),
            BucketInterval::Week => format!("toStartOfWeek({column})"),
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "hour" => Ok(BucketInterval::Hour),
            "day" => Ok(BucketInterval::Day),
            "week" => Ok(BucketInterval::Week),
            other => Err(CoreError::Validation(format!(
                "interval must be hour|day|week, got {other:?}"
            ))),
        }
    }
}

/// A single count row from ClickHouse.
#[derive(Debug, Deserialize, Row)]
pub struct CountRow {
    pub count: u64,
}

/// A single string value row from ClickHouse.
#[derive(Debug, Serialize, Deserialize, Row)]
pub struct StringValueRow {
    pub val: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    #[test]
    fn test_preset_resolution() {
        let params = TimeRangeParams {
            preset: Some("1h".to_string()),
            ..Default::default()
        };
        let window = params.resolve(now()).unwrap();
        assert_eq!((window.to - window.from).num_seconds(), 3_600);
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let params = TimeRangeParams {
            preset: Some("2h".to_string()),
            ..Default::default()
        };
        assert!(params.resolve(now()).is_err());
    }

    #[test]
    fn test_explicit_range() {
        let params = TimeRangeParams {
            preset: None,
            from: Some("2026-06-01T00:00:00Z".to_string()),
            to: Some("2026-06-01T06:00:00Z".to_string()),
        };
        let window = params.resolve(now()).unwrap();
        assert_eq!((window.to - window.from).num_hours(), 6);
    }

    #[test]
    fn test_half_range_rejected() {
        let params = TimeRangeParams {
            preset: None,
            from: Some("2026-06-01T00:00:00Z".to_string()),
            to: None,
        };
        assert!(params.resolve(now()).is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let params = TimeRangeParams {
            preset: None,
            from: Some("2026-06-01T06:00:00Z".to_string()),
            to: Some("2026-06-01T00:00:00Z".to_string()),
        };
        assert!(params.resolve(now()).is_err());
    }

    #[test]
    fn test_bucket_interval() {
        assert_eq!(
            BucketInterval::parse("day").unwrap().truncate_fn("timestamp"),
            "toStartOfDay(timestamp)"
        );
        assert!(BucketInterval::parse("month").is_err());
    }
}
