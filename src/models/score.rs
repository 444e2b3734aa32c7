use clickhouse::Row;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::{nanos_to_string, rfc3339_to_nanos};

/// Score data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreType {
    Numeric,
    Categorical,
    Boolean,
}

impl ScoreType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreType::Numeric => "NUMERIC",
            ScoreType::Categorical => "CATEGORICAL",
            ScoreType::Boolean => "BOOLEAN",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "NUMERIC" => Ok(ScoreType::Numeric),
            "CATEGORICAL" => Ok(ScoreType::Categorical),
            "BOOLEAN" => Ok(ScoreType::Boolean),
            other => Err(CoreError::Validation(format!(
                "unknown score type {other:?}"
            ))),
        }
    }
}

/// Who produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreSource {
    Api,
    Eval,
    Annotation,
}

impl ScoreSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreSource::Api => "API",
            ScoreSource::Eval => "EVAL",
            ScoreSource::Annotation => "ANNOTATION",
        }
    }
}

/// A score row as stored in `scores`. Append-only; updates re-append and
/// deletes go through an asynchronous mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct ScoreRow {
    pub score_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub name: String,
    pub value: Option<f64>,
    pub string_value: Option<String>,
    pub score_type: String,
    pub source: String,
    pub reason: String,
    pub metadata: String,
    pub experiment_id: String,
    pub experiment_item_id: String,
    pub timestamp: i64,
}

/// Score write request.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreIngest {
    #[serde(default)]
    pub score_id: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub string_value: Option<String>,
    pub score_type: ScoreType,
    pub source: ScoreSource,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub experiment_item_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ScoreIngest {
    /// Validate and convert to a storable row. At least one of
    /// `(trace_id, span_id)` must be set, numeric/boolean scores need a
    /// `value`, and categorical scores need a `string_value`.
    pub fn into_row(self, now_nanos: i64) -> CoreResult<ScoreRow> {
        if self.trace_id.is_none() && self.span_id.is_none() {
            return Err(CoreError::Validation(
                "score requires a trace_id or span_id".to_string(),
            ));
        }
        if let Some(trace_id) = self.trace_id.as_deref() {
            ids::validate_trace_id(trace_id)?;
        }
        if let Some(span_id) = self.span_id.as_deref() {
            ids::validate_span_id(span_id)?;
        }
        match self.score_type {
            ScoreType::Numeric | ScoreType::Boolean if self.value.is_none() => {
                return Err(CoreError::Validation(format!(
                    "{} score requires a value",
                    self.score_type.as_str()
                )));
            }
            ScoreType::Categorical if self.string_value.is_none() => {
                return Err(CoreError::Validation(
                    "CATEGORICAL score requires a string_value".to_string(),
                ));
            }
            _ => {}
        }
        if self.name.is_empty() {
            return Err(CoreError::Validation("score name is required".to_string()));
        }

        let timestamp = match self.timestamp.as_deref() {
            Some(ts) => rfc3339_to_nanos(ts)?,
            None => now_nanos,
        };

        Ok(ScoreRow {
            score_id: self.score_id.unwrap_or_else(ids::new_id),
            project_id: self.project_id,
            organization_id: self.organization_id.unwrap_or_default(),
            trace_id: self.trace_id.map(|t| t.to_ascii_lowercase()),
            span_id: self.span_id.map(|s| s.to_ascii_lowercase()),
            name: self.name,
            value: self.value,
            string_value: self.string_value,
            score_type: self.score_type.as_str().to_string(),
            source: self.source.as_str().to_string(),
            reason: self.reason.unwrap_or_default(),
            metadata: self
                .metadata
                .map(|m| m.to_string())
                .unwrap_or_else(|| "{}".to_string()),
            experiment_id: self.experiment_id.unwrap_or_default(),
            experiment_item_id: self.experiment_item_id.unwrap_or_default(),
            timestamp,
        })
    }
}

/// Score as rendered on the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResponse {
    pub score_id: String,
    pub project_id: String,
    pub organization_id: String,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub name: String,
    pub value: Option<f64>,
    pub string_value: Option<String>,
    pub score_type: String,
    pub source: String,
    pub reason: String,
    pub metadata: serde_json::Value,
    pub experiment_id: Option<String>,
    pub experiment_item_id: Option<String>,
    pub timestamp: String,
}

impl From<ScoreRow> for ScoreResponse {
    fn from(row: ScoreRow) -> Self {
        ScoreResponse {
            score_id: row.score_id,
            project_id: row.project_id,
            organization_id: row.organization_id,
            trace_id: row.trace_id,
            span_id: row.span_id,
            name: row.name,
            value: row.value,
            string_value: row.string_value,
            score_type: row.score_type,
            source: row.source,
            reason: row.reason,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
            experiment_id: (!row.experiment_id.is_empty()).then_some(row.experiment_id),
            experiment_item_id: (!row.experiment_item_id.is_empty())
                .then_some(row.experiment_item_id),
            timestamp: nanos_to_string(row.timestamp),
        }
    }
}

/// Score listing filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreFilter {
    pub project_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score_type: Option<String>,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub timestamp_from: Option<String>,
    #[serde(default)]
    pub timestamp_to: Option<String>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

/// Summary statistics for one score name (§4.6 GetStatistics).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ScoreStatistics {
    pub count: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Most frequent categorical value, when any string_value is present.
    pub mode: Option<String>,
    /// Share of the mode among categorical rows, in percent.
    pub mode_percentage: Option<f64>,
}

/// One time-series bucket.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct ScoreTimeBucket {
    pub bucket: i64,
    pub avg_value: f64,
    pub count: u64,
}

/// One histogram bin.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DistributionBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// One heatmap cell over two score names.
#[derive(Debug, Clone, Serialize)]
pub struct HeatmapCell {
    pub x_bin: usize,
    pub y_bin: usize,
    pub count: u64,
}

/// Cross-score comparison metrics (§4.6 GetComparisonMetrics).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ComparisonMetrics {
    pub count: u64,
    pub pearson: f64,
    pub spearman: f64,
    pub mae: f64,
    pub rmse: f64,
}

/// Count of scores per source and day, merged from the source×day rollup.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDailyCount {
    pub source: String,
    pub day: String,
    pub count: u64,
}

/// Merged rollup of one materialized-view summary group.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreSummary {
    pub key: String,
    pub name: String,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// sum / count, computed in code to tolerate the view's aggregate state
    /// format.
    pub avg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest_fixture() -> ScoreIngest {
        ScoreIngest {
            score_id: None,
            project_id: "proj-1".to_string(),
            organization_id: None,
            trace_id: Some("ab".repeat(16)),
            span_id: None,
            name: "helpfulness".to_string(),
            value: Some(0.8),
            string_value: None,
            score_type: ScoreType::Numeric,
            source: ScoreSource::Eval,
            reason: None,
            metadata: None,
            experiment_id: None,
            experiment_item_id: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_into_row_generates_sortable_id() {
        let row = ingest_fixture().into_row(42).unwrap();
        assert_eq!(row.score_id.len(), 26);
        assert_eq!(row.timestamp, 42);
        assert_eq!(row.score_type, "NUMERIC");
        assert_eq!(row.source, "EVAL");
    }

    #[test]
    fn test_requires_target() {
        let mut bad = ingest_fixture();
        bad.trace_id = None;
        assert!(bad.into_row(0).is_err());
    }

    #[test]
    fn test_numeric_requires_value() {
        let mut bad = ingest_fixture();
        bad.value = None;
        assert!(bad.into_row(0).is_err());
    }

    #[test]
    fn test_categorical_requires_string_value() {
        let mut score = ingest_fixture();
        score.score_type = ScoreType::Categorical;
        assert!(score.clone().into_row(0).is_err());
        score.string_value = Some("good".to_string());
        assert!(score.into_row(0).is_ok());
    }

    #[test]
    fn test_span_only_target_allowed() {
        let mut score = ingest_fixture();
        score.trace_id = None;
        score.span_id = Some("0123456789abcdef".to_string());
        let row = score.into_row(0).unwrap();
        assert!(row.trace_id.is_none());
        assert_eq!(row.span_id.as_deref(), Some("0123456789abcdef"));
    }

    #[test]
    fn test_score_type_parse() {
        assert_eq!(ScoreType::parse("NUMERIC").unwrap(), ScoreType::Numeric);
        assert!(ScoreType::parse("numeric").is_err());
    }
}
