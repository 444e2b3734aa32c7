use serde::{Deserialize, Serialize};

/// A trace registered through the management API (relational, mutable).
/// The columnar store remains the source of truth for telemetry; this row
/// carries the external-id mapping and mutable annotations.
#[derive(Debug, Clone, Serialize)]
pub struct LlmTrace {
    pub id: String,
    pub project_id: String,
    pub external_trace_id: String,
    pub name: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLlmTraceRequest {
    pub project_id: String,
    pub external_trace_id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// An observation registered through the management API. Error state is
/// carried as the OTLP status code; `status_message` is informational only.
#[derive(Debug, Clone, Serialize)]
pub struct LlmObservation {
    pub id: String,
    pub trace_id: String,
    pub external_observation_id: String,
    pub name: String,
    pub observation_type: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub status_code: u8,
    pub status_message: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub usage: serde_json::Value,
    pub cost: Option<rust_decimal::Decimal>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateObservationRequest {
    pub trace_id: String,
    pub external_observation_id: String,
    pub name: String,
    #[serde(default)]
    pub observation_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub status_code: u8,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
    #[serde(default)]
    pub cost: Option<rust_decimal::Decimal>,
}

/// A server-side-computed evaluation score (relational, mutable).
#[derive(Debug, Clone, Serialize)]
pub struct QualityScore {
    pub id: String,
    pub project_id: String,
    pub trace_id: Option<String>,
    pub observation_id: Option<String>,
    pub name: String,
    pub value: Option<f64>,
    pub string_value: Option<String>,
    pub data_type: String,
    pub source: String,
    pub evaluator_name: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub categories: serde_json::Value,
    pub author: Option<String>,
    pub reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQualityScoreRequest {
    pub project_id: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub observation_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub evaluator_name: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub categories: Option<serde_json::Value>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Aggregate of one quality-score name. A row carrying both a numeric value
/// and a categorical value buckets as categorical.
#[derive(Debug, Clone, Serialize)]
pub struct QualityScoreAggregate {
    pub name: String,
    pub numeric_count: u64,
    pub categorical_count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// One bucket of the quality-score distribution: either a numeric bin label
/// or a categorical value.
#[derive(Debug, Clone, Serialize)]
pub struct QualityScoreBucket {
    pub bucket: String,
    pub count: u64,
}
