use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreResult;
use crate::ids;
use crate::models::rfc3339_to_nanos;
use crate::models::span::SpanIngest;

/// One event inside an ingest batch. The pipeline fans out by variant, so
/// the set of signal kinds is closed here rather than dispatched on strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TelemetryEventBody {
    Span(SpanIngest),
    Log(LogIngest),
    MetricSum(MetricSumIngest),
    MetricGauge(MetricGaugeIngest),
    MetricHistogram(MetricHistogramIngest),
    MetricExpHistogram(MetricExpHistogramIngest),
    GenaiEvent(GenAiEventIngest),
}

impl TelemetryEventBody {
    pub fn kind(&self) -> SignalKind {
        match self {
            TelemetryEventBody::Span(_) => SignalKind::Span,
            TelemetryEventBody::Log(_) => SignalKind::Log,
            TelemetryEventBody::MetricSum(_) => SignalKind::MetricSum,
            TelemetryEventBody::MetricGauge(_) => SignalKind::MetricGauge,
            TelemetryEventBody::MetricHistogram(_) => SignalKind::MetricHistogram,
            TelemetryEventBody::MetricExpHistogram(_) => SignalKind::MetricExpHistogram,
            TelemetryEventBody::GenaiEvent(_) => SignalKind::GenaiEvent,
        }
    }
}

/// Signal kind discriminant, also used for `telemetry_events.event_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Span,
    Log,
    MetricSum,
    MetricGauge,
    MetricHistogram,
    MetricExpHistogram,
    GenaiEvent,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Span => "span",
            SignalKind::Log => "log",
            SignalKind::MetricSum => "metric_sum",
            SignalKind::MetricGauge => "metric_gauge",
            SignalKind::MetricHistogram => "metric_histogram",
            SignalKind::MetricExpHistogram => "metric_exp_histogram",
            SignalKind::GenaiEvent => "genai_event",
        }
    }
}

// ── Logs ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogIngest {
    pub timestamp: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub severity_text: Option<String>,
    #[serde(default)]
    pub severity_number: u8,
    pub body: String,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    #[serde(default)]
    pub scope_name: Option<String>,
    #[serde(default)]
    pub scope_version: Option<String>,
    #[serde(default)]
    pub scope_attributes: HashMap<String, String>,
    #[serde(default)]
    pub log_attributes: HashMap<String, String>,
    #[serde(default)]
    pub event_name: Option<String>,
}

/// A log row as stored in `otel_logs`.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct LogRow {
    pub timestamp: i64,
    pub project_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub severity_text: String,
    pub severity_number: u8,
    pub service_name: String,
    pub body: String,
    pub resource_attributes: String,
    pub scope_name: String,
    pub scope_version: String,
    pub scope_attributes: String,
    pub log_attributes: String,
    pub event_name: String,
}

impl LogIngest {
    pub fn into_row(self, project_id: &str) -> CoreResult<LogRow> {
        if let Some(trace_id) = self.trace_id.as_deref() {
            ids::validate_trace_id(trace_id)?;
        }
        if let Some(span_id) = self.span_id.as_deref() {
            ids::validate_span_id(span_id)?;
        }
        let service_name = self
            .resource_attributes
            .get(crate::models::span::ATTR_SERVICE_NAME)
            .cloned()
            .unwrap_or_default();
        Ok(LogRow {
            timestamp: rfc3339_to_nanos(&self.timestamp)?,
            project_id: project_id.to_string(),
            trace_id: self.trace_id.unwrap_or_default().to_ascii_lowercase(),
            span_id: self.span_id.unwrap_or_default().to_ascii_lowercase(),
            severity_text: self.severity_text.unwrap_or_default(),
            severity_number: self.severity_number,
            service_name,
            body: self.body,
            resource_attributes: ids::attrs_to_json(&self.resource_attributes),
            scope_name: self.scope_name.unwrap_or_default(),
            scope_version: self.scope_version.unwrap_or_default(),
            scope_attributes: ids::attrs_to_json(&self.scope_attributes),
            log_attributes: ids::attrs_to_json(&self.log_attributes),
            event_name: self.event_name.unwrap_or_default(),
        })
    }
}

// ── Metrics ──

/// Fields shared by every metric shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricCommon {
    pub metric_name: String,
    #[serde(default)]
    pub metric_description: Option<String>,
    #[serde(default)]
    pub metric_unit: Option<String>,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub start_time: Option<String>,
    pub time: String,
    #[serde(default)]
    pub flags: u32,
}

impl MetricCommon {
    fn service_name(&self) -> String {
        self.resource_attributes
            .get(crate::models::span::ATTR_SERVICE_NAME)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSumIngest {
    #[serde(flatten)]
    pub common: MetricCommon,
    pub value: f64,
    #[serde(default)]
    pub aggregation_temporality: i32,
    #[serde(default)]
    pub is_monotonic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct MetricSumRow {
    pub project_id: String,
    pub service_name: String,
    pub metric_name: String,
    pub metric_description: String,
    pub metric_unit: String,
    pub resource_attributes: String,
    pub attributes: String,
    pub start_time_unix: i64,
    pub time_unix: i64,
    pub value: f64,
    pub flags: u32,
    pub aggregation_temporality: i32,
    pub is_monotonic: u8,
}

impl MetricSumIngest {
    pub fn into_row(self, project_id: &str) -> CoreResult<MetricSumRow> {
        let time_unix = rfc3339_to_nanos(&self.common.time)?;
        let start_time_unix = self
            .common
            .start_time
            .as_deref()
            .map(rfc3339_to_nanos)
            .transpose()?
            .unwrap_or(time_unix);
        Ok(MetricSumRow {
            project_id: project_id.to_string(),
            service_name: self.common.service_name(),
            metric_name: self.common.metric_name,
            metric_description: self.common.metric_description.unwrap_or_default(),
            metric_unit: self.common.metric_unit.unwrap_or_default(),
            resource_attributes: ids::attrs_to_json(&self.common.resource_attributes),
            attributes: ids::attrs_to_json(&self.common.attributes),
            start_time_unix,
            time_unix,
            value: self.value,
            flags: self.common.flags,
            aggregation_temporality: self.aggregation_temporality,
            is_monotonic: ids::bool_to_byte(self.is_monotonic),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricGaugeIngest {
    #[serde(flatten)]
    pub common: MetricCommon,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct MetricGaugeRow {
    pub project_id: String,
    pub service_name: String,
    pub metric_name: String,
    pub metric_description: String,
    pub metric_unit: String,
    pub resource_attributes: String,
    pub attributes: String,
    pub start_time_unix: i64,
    pub time_unix: i64,
    pub value: f64,
    pub flags: u32,
}

impl MetricGaugeIngest {
    pub fn into_row(self, project_id: &str) -> CoreResult<MetricGaugeRow> {
        let time_unix = rfc3339_to_nanos(&self.common.time)?;
        let start_time_unix = self
            .common
            .start_time
            .as_deref()
            .map(rfc3339_to_nanos)
            .transpose()?
            .unwrap_or(time_unix);
        Ok(MetricGaugeRow {
            project_id: project_id.to_string(),
            service_name: self.common.service_name(),
            metric_name: self.common.metric_name,
            metric_description: self.common.metric_description.unwrap_or_default(),
            metric_unit: self.common.metric_unit.unwrap_or_default(),
            resource_attributes: ids::attrs_to_json(&self.common.resource_attributes),
            attributes: ids::attrs_to_json(&self.common.attributes),
            start_time_unix,
            time_unix,
            value: self.value,
            flags: self.common.flags,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricHistogramIngest {
    #[serde(flatten)]
    pub common: MetricCommon,
    pub count: u64,
    pub sum: f64,
    #[serde(default)]
    pub bucket_counts: Vec<u64>,
    #[serde(default)]
    pub explicit_bounds: Vec<f64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub aggregation_temporality: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct MetricHistogramRow {
    pub project_id: String,
    pub service_name: String,
    pub metric_name: String,
    pub metric_description: String,
    pub metric_unit: String,
    pub resource_attributes: String,
    pub attributes: String,
    pub start_time_unix: i64,
    pub time_unix: i64,
    pub count: u64,
    pub sum: f64,
    pub bucket_counts: Vec<u64>,
    pub explicit_bounds: Vec<f64>,
    pub min: f64,
    pub max: f64,
    pub flags: u32,
    pub aggregation_temporality: i32,
}

impl MetricHistogramIngest {
    pub fn into_row(self, project_id: &str) -> CoreResult<MetricHistogramRow> {
        let time_unix = rfc3339_to_nanos(&self.common.time)?;
        let start_time_unix = self
            .common
            .start_time
            .as_deref()
            .map(rfc3339_to_nanos)
            .transpose()?
            .unwrap_or(time_unix);
        Ok(MetricHistogramRow {
            project_id: project_id.to_string(),
            service_name: self.common.service_name(),
            metric_name: self.common.metric_name,
            metric_description: self.common.metric_description.unwrap_or_default(),
            metric_unit: self.common.metric_unit.unwrap_or_default(),
            resource_attributes: ids::attrs_to_json(&self.common.resource_attributes),
            attributes: ids::attrs_to_json(&self.common.attributes),
            start_time_unix,
            time_unix,
            count: self.count,
            sum: self.sum,
            bucket_counts: self.bucket_counts,
            explicit_bounds: self.explicit_bounds,
            min: self.min.unwrap_or(0.0),
            max: self.max.unwrap_or(0.0),
            flags: self.common.flags,
            aggregation_temporality: self.aggregation_temporality,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricExpHistogramIngest {
    #[serde(flatten)]
    pub common: MetricCommon,
    pub count: u64,
    pub sum: f64,
    pub scale: i32,
    #[serde(default)]
    pub zero_count: u64,
    #[serde(default)]
    pub positive_offset: i32,
    #[serde(default)]
    pub positive_bucket_counts: Vec<u64>,
    #[serde(default)]
    pub negative_offset: i32,
    #[serde(default)]
    pub negative_bucket_counts: Vec<u64>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub aggregation_temporality: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct MetricExpHistogramRow {
    pub project_id: String,
    pub service_name: String,
    pub metric_name: String,
    pub metric_description: String,
    pub metric_unit: String,
    pub resource_attributes: String,
    pub attributes: String,
    pub start_time_unix: i64,
    pub time_unix: i64,
    pub count: u64,
    pub sum: f64,
    pub scale: i32,
    pub zero_count: u64,
    pub positive_offset: i32,
    pub positive_bucket_counts: Vec<u64>,
    pub negative_offset: i32,
    pub negative_bucket_counts: Vec<u64>,
    pub min: f64,
    pub max: f64,
    pub flags: u32,
    pub aggregation_temporality: i32,
}

impl MetricExpHistogramIngest {
    pub fn into_row(self, project_id: &str) -> CoreResult<MetricExpHistogramRow> {
        let time_unix = rfc3339_to_nanos(&self.common.time)?;
        let start_time_unix = self
            .common
            .start_time
            .as_deref()
            .map(rfc3339_to_nanos)
            .transpose()?
            .unwrap_or(time_unix);
        Ok(MetricExpHistogramRow {
            project_id: project_id.to_string(),
            service_name: self.common.service_name(),
            metric_name: self.common.metric_name,
            metric_description: self.common.metric_description.unwrap_or_default(),
            metric_unit: self.common.metric_unit.unwrap_or_default(),
            resource_attributes: ids::attrs_to_json(&self.common.resource_attributes),
            attributes: ids::attrs_to_json(&self.common.attributes),
            start_time_unix,
            time_unix,
            count: self.count,
            sum: self.sum,
            scale: self.scale,
            zero_count: self.zero_count,
            positive_offset: self.positive_offset,
            positive_bucket_counts: self.positive_bucket_counts,
            negative_offset: self.negative_offset,
            negative_bucket_counts: self.negative_bucket_counts,
            min: self.min.unwrap_or(0.0),
            max: self.max.unwrap_or(0.0),
            flags: self.common.flags,
            aggregation_temporality: self.aggregation_temporality,
        })
    }
}

// ── GenAI events ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenAiEventIngest {
    pub timestamp: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    pub event_name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// A GenAI event row as stored in `otel_genai_events`.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct GenAiEventRow {
    pub event_id: String,
    pub project_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub timestamp: i64,
    pub event_name: String,
    pub provider: String,
    pub model: String,
    pub role: String,
    pub content: String,
    pub attributes: String,
}

impl GenAiEventIngest {
    pub fn into_row(self, project_id: &str) -> CoreResult<GenAiEventRow> {
        if let Some(trace_id) = self.trace_id.as_deref() {
            ids::validate_trace_id(trace_id)?;
        }
        if let Some(span_id) = self.span_id.as_deref() {
            ids::validate_span_id(span_id)?;
        }
        Ok(GenAiEventRow {
            event_id: ids::new_id(),
            project_id: project_id.to_string(),
            trace_id: self.trace_id.unwrap_or_default().to_ascii_lowercase(),
            span_id: self.span_id.unwrap_or_default().to_ascii_lowercase(),
            timestamp: rfc3339_to_nanos(&self.timestamp)?,
            event_name: self.event_name,
            provider: self.provider.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            role: self.role.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            attributes: ids::attrs_to_json(&self.attributes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tag_dispatch() {
        let json = serde_json::json!({
            "event_type": "log",
            "timestamp": "2026-01-01T00:00:00Z",
            "body": "hello",
        });
        let body: TelemetryEventBody = serde_json::from_value(json).unwrap();
        assert_eq!(body.kind(), SignalKind::Log);
        assert_eq!(body.kind().as_str(), "log");
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let json = serde_json::json!({
            "event_type": "profile",
            "timestamp": "2026-01-01T00:00:00Z",
        });
        assert!(serde_json::from_value::<TelemetryEventBody>(json).is_err());
    }

    #[test]
    fn test_metric_sum_flattened_shape() {
        let json = serde_json::json!({
            "event_type": "metric_sum",
            "metric_name": "gen_ai.client.tokens",
            "time": "2026-01-01T00:00:00Z",
            "value": 12.0,
            "is_monotonic": true,
        });
        let body: TelemetryEventBody = serde_json::from_value(json).unwrap();
        let TelemetryEventBody::MetricSum(sum) = body else {
            panic!("expected metric_sum");
        };
        let row = sum.into_row("proj-1").unwrap();
        assert_eq!(row.metric_name, "gen_ai.client.tokens");
        assert_eq!(row.is_monotonic, 1);
        assert_eq!(row.start_time_unix, row.time_unix);
    }

    #[test]
    fn test_genai_event_row() {
        let ingest = GenAiEventIngest {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            trace_id: Some("ab".repeat(16)),
            span_id: Some("0123456789abcdef".to_string()),
            event_name: "gen_ai.choice".to_string(),
            provider: Some("openai".to_string()),
            model: Some("gpt-4o".to_string()),
            role: Some("assistant".to_string()),
            content: Some("hi".to_string()),
            attributes: HashMap::new(),
        };
        let row = ingest.into_row("proj-1").unwrap();
        assert_eq!(row.event_id.len(), 26);
        assert_eq!(row.event_name, "gen_ai.choice");
    }

    #[test]
    fn test_log_rejects_bad_trace_id() {
        let ingest = LogIngest {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            trace_id: Some("zzz".to_string()),
            span_id: None,
            severity_text: None,
            severity_number: 0,
            body: "x".to_string(),
            resource_attributes: HashMap::new(),
            scope_name: None,
            scope_version: None,
            scope_attributes: HashMap::new(),
            log_attributes: HashMap::new(),
            event_name: None,
        };
        assert!(ingest.into_row("proj-1").is_err());
    }
}
