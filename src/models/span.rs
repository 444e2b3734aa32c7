use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::{nanos_to_string, rfc3339_to_nanos};

/// Attribute keys the span store materializes into first-class columns at
/// ingest so filter predicates never expand a map at query time.
pub const ATTR_SERVICE_NAME: &str = "service.name";
pub const ATTR_ENVIRONMENT: &str = "deployment.environment";
pub const ATTR_MODEL_NAME: &str = "gen_ai.request.model";
pub const ATTR_PROVIDER_NAME: &str = "gen_ai.provider.name";
pub const ATTR_SPAN_TYPE: &str = "brokle.span.type";
pub const ATTR_LEVEL: &str = "brokle.span.level";
pub const ATTR_VERSION: &str = "brokle.span.version";
pub const ATTR_USER_ID: &str = "user.id";
pub const ATTR_SESSION_ID: &str = "session.id";

/// A span row as stored in `otel_traces`.
///
/// Field order matches the table's column order; timestamps are i64
/// nanoseconds since epoch (DateTime64(9)), attribute maps are JSON object
/// strings, monetary columns are Decimal64(12) carried as raw scaled i64,
/// and events/links are parallel arrays of equal length.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct SpanRow {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_state: String,
    pub project_id: String,
    pub span_name: String,
    pub span_kind: u8,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub completion_start_time: Option<i64>,
    pub duration_nano: u64,
    pub status_code: u8,
    pub status_message: String,
    pub has_error: u8,
    pub input: String,
    pub output: String,
    pub input_blob_id: String,
    pub output_blob_id: String,
    pub resource_attributes: String,
    pub span_attributes: String,
    pub scope_name: String,
    pub scope_version: String,
    pub scope_attributes: String,
    pub resource_schema_url: String,
    pub scope_schema_url: String,
    pub usage_details: Vec<(String, u64)>,
    pub cost_details: Vec<(String, i64)>,
    pub pricing_snapshot: Vec<(String, i64)>,
    pub total_cost: Option<i64>,
    pub service_name: String,
    pub model_name: String,
    pub provider_name: String,
    pub span_type: String,
    pub level: String,
    pub version: String,
    pub user_id: String,
    pub session_id: String,
    pub environment: String,
    pub events_timestamp: Vec<i64>,
    pub events_name: Vec<String>,
    pub events_attributes: Vec<String>,
    pub links_trace_id: Vec<String>,
    pub links_span_id: Vec<String>,
    pub links_trace_state: Vec<String>,
    pub links_attributes: Vec<String>,
    pub event_ts: i64,
    pub deleted_at: Option<i64>,
}

/// One logical span event (AoS form of the parallel arrays).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub timestamp: String,
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// One span link (AoS form of the parallel arrays).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub trace_state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// A span as submitted by a producer inside an ingest batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanIngest {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub trace_state: Option<String>,
    pub span_name: String,
    #[serde(default)]
    pub span_kind: u8,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub completion_start_time: Option<String>,
    #[serde(default)]
    pub status_code: u8,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub resource_attributes: HashMap<String, String>,
    #[serde(default)]
    pub span_attributes: HashMap<String, String>,
    #[serde(default)]
    pub scope_name: Option<String>,
    #[serde(default)]
    pub scope_version: Option<String>,
    #[serde(default)]
    pub scope_attributes: HashMap<String, String>,
    #[serde(default)]
    pub resource_schema_url: Option<String>,
    #[serde(default)]
    pub scope_schema_url: Option<String>,
    #[serde(default)]
    pub usage_details: HashMap<String, u64>,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub links: Vec<SpanLink>,
}

impl SpanIngest {
    /// Validate ids and enums, derive `duration_nano`/`has_error`, flatten
    /// events/links into parallel arrays, and materialize the server-side
    /// columns. Pricing enrichment happens later in the pipeline.
    pub fn into_row(self, project_id: &str, event_ts: i64) -> CoreResult<SpanRow> {
        ids::validate_trace_id(&self.trace_id)?;
        ids::validate_span_id(&self.span_id)?;
        if let Some(parent) = self.parent_span_id.as_deref() {
            if !parent.is_empty() {
                ids::validate_span_id(parent)?;
            }
        }
        if self.span_kind > 5 {
            return Err(CoreError::Validation(format!(
                "span_kind must be 0..5, got {}",
                self.span_kind
            )));
        }
        if self.status_code > 2 {
            return Err(CoreError::Validation(format!(
                "status_code must be 0..2, got {}",
                self.status_code
            )));
        }

        let start_time = rfc3339_to_nanos(&self.start_time)?;
        let end_time = self.end_time.as_deref().map(rfc3339_to_nanos).transpose()?;
        let completion_start_time = self
            .completion_start_time
            .as_deref()
            .map(rfc3339_to_nanos)
            .transpose()?;
        if let Some(end) = end_time {
            if end < start_time {
                return Err(CoreError::Validation(
                    "end_time precedes start_time".to_string(),
                ));
            }
        }
        let duration_nano = end_time.map_or(0, |end| (end - start_time) as u64);

        let mut events_timestamp = Vec::with_capacity(self.events.len());
        let mut events_name = Vec::with_capacity(self.events.len());
        let mut events_attributes = Vec::with_capacity(self.events.len());
        for event in &self.events {
            events_timestamp.push(rfc3339_to_nanos(&event.timestamp)?);
            events_name.push(event.name.clone());
            events_attributes.push(event.attributes.to_string());
        }

        let mut links_trace_id = Vec::with_capacity(self.links.len());
        let mut links_span_id = Vec::with_capacity(self.links.len());
        let mut links_trace_state = Vec::with_capacity(self.links.len());
        let mut links_attributes = Vec::with_capacity(self.links.len());
        for link in &self.links {
            ids::validate_trace_id(&link.trace_id)?;
            ids::validate_span_id(&link.span_id)?;
            links_trace_id.push(link.trace_id.to_ascii_lowercase());
            links_span_id.push(link.span_id.to_ascii_lowercase());
            links_trace_state.push(link.trace_state.clone());
            links_attributes.push(link.attributes.to_string());
        }

        let attr = |map: &HashMap<String, String>, key: &str| {
            map.get(key).cloned().unwrap_or_default()
        };
        let usage_details: Vec<(String, u64)> = {
            let mut pairs: Vec<_> = self.usage_details.clone().into_iter().collect();
            pairs.sort();
            pairs
        };

        let status_code = self.status_code;
        Ok(SpanRow {
            trace_id: self.trace_id.to_ascii_lowercase(),
            span_id: self.span_id.to_ascii_lowercase(),
            parent_span_id: self
                .parent_span_id
                .unwrap_or_default()
                .to_ascii_lowercase(),
            trace_state: self.trace_state.unwrap_or_default(),
            project_id: project_id.to_string(),
            span_name: self.span_name,
            span_kind: self.span_kind,
            start_time,
            end_time,
            completion_start_time,
            duration_nano,
            status_code,
            status_message: self.status_message.unwrap_or_default(),
            has_error: u8::from(status_code == 2),
            input: self.input.unwrap_or_default(),
            output: self.output.unwrap_or_default(),
            input_blob_id: String::new(),
            output_blob_id: String::new(),
            resource_attributes: ids::attrs_to_json(&self.resource_attributes),
            span_attributes: ids::attrs_to_json(&self.span_attributes),
            scope_name: self.scope_name.unwrap_or_default(),
            scope_version: self.scope_version.unwrap_or_default(),
            scope_attributes: ids::attrs_to_json(&self.scope_attributes),
            resource_schema_url: self.resource_schema_url.unwrap_or_default(),
            scope_schema_url: self.scope_schema_url.unwrap_or_default(),
            usage_details,
            cost_details: Vec::new(),
            pricing_snapshot: Vec::new(),
            total_cost: None,
            service_name: attr(&self.resource_attributes, ATTR_SERVICE_NAME),
            model_name: attr(&self.span_attributes, ATTR_MODEL_NAME),
            provider_name: attr(&self.span_attributes, ATTR_PROVIDER_NAME),
            span_type: attr(&self.span_attributes, ATTR_SPAN_TYPE),
            level: attr(&self.span_attributes, ATTR_LEVEL),
            version: attr(&self.span_attributes, ATTR_VERSION),
            user_id: attr(&self.span_attributes, ATTR_USER_ID),
            session_id: attr(&self.span_attributes, ATTR_SESSION_ID),
            environment: attr(&self.resource_attributes, ATTR_ENVIRONMENT),
            events_timestamp,
            events_name,
            events_attributes,
            links_trace_id,
            links_span_id,
            links_trace_state,
            links_attributes,
            event_ts,
            deleted_at: None,
        })
    }
}

impl SpanRow {
    /// The events/links parallel arrays must stay in lockstep.
    pub fn check_array_lengths(&self) -> CoreResult<()> {
        let events_ok = self.events_timestamp.len() == self.events_name.len()
            && self.events_name.len() == self.events_attributes.len();
        let links_ok = self.links_trace_id.len() == self.links_span_id.len()
            && self.links_span_id.len() == self.links_trace_state.len()
            && self.links_trace_state.len() == self.links_attributes.len();
        if !events_ok || !links_ok {
            return Err(CoreError::Corrupt(format!(
                "span {} has ragged event/link arrays",
                self.span_id
            )));
        }
        Ok(())
    }

    /// Reassemble the SoA event columns into logical events.
    pub fn events(&self) -> Vec<SpanEvent> {
        self.events_name
            .iter()
            .enumerate()
            .map(|(i, name)| SpanEvent {
                timestamp: nanos_to_string(
                    self.events_timestamp.get(i).copied().unwrap_or_default(),
                ),
                name: name.clone(),
                attributes: self
                    .events_attributes
                    .get(i)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect()
    }

    /// Reassemble the SoA link columns into logical links.
    pub fn links(&self) -> Vec<SpanLink> {
        self.links_trace_id
            .iter()
            .enumerate()
            .map(|(i, trace_id)| SpanLink {
                trace_id: trace_id.clone(),
                span_id: self.links_span_id.get(i).cloned().unwrap_or_default(),
                trace_state: self.links_trace_state.get(i).cloned().unwrap_or_default(),
                attributes: self
                    .links_attributes
                    .get(i)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect()
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }
}

/// Query filter over spans (§4.4). Durations arrive in milliseconds and are
/// converted to nanoseconds when the predicate is built.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpanFilter {
    pub project_id: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub span_type: Option<String>,
    #[serde(default)]
    pub span_kind: Option<u8>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub start_time_from: Option<String>,
    #[serde(default)]
    pub start_time_to: Option<String>,
    #[serde(default)]
    pub min_duration_ms: Option<u64>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    #[serde(default)]
    pub min_total_cost: Option<rust_decimal::Decimal>,
    #[serde(default)]
    pub max_total_cost: Option<rust_decimal::Decimal>,
    #[serde(default)]
    pub is_completed: Option<bool>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

/// Span as rendered on the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct SpanResponse {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub project_id: String,
    pub span_name: String,
    pub span_kind: u8,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_nano: u64,
    pub status_code: u8,
    pub status_message: String,
    pub has_error: bool,
    pub input: String,
    pub output: String,
    pub input_blob_id: Option<String>,
    pub output_blob_id: Option<String>,
    pub service_name: String,
    pub model_name: String,
    pub provider_name: String,
    pub span_type: String,
    pub level: String,
    pub version: String,
    pub span_attributes: serde_json::Value,
    pub resource_attributes: serde_json::Value,
    pub usage_details: HashMap<String, u64>,
    pub cost_details: HashMap<String, rust_decimal::Decimal>,
    pub pricing_snapshot: HashMap<String, rust_decimal::Decimal>,
    pub total_cost: Option<rust_decimal::Decimal>,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
}

impl From<SpanRow> for SpanResponse {
    fn from(row: SpanRow) -> Self {
        let events = row.events();
        let links = row.links();
        let money_map = |pairs: &[(String, i64)]| {
            pairs
                .iter()
                .map(|(k, raw)| (k.clone(), ids::money_from_raw(*raw)))
                .collect()
        };
        SpanResponse {
            events,
            links,
            start_time: nanos_to_string(row.start_time),
            end_time: row.end_time.map(nanos_to_string),
            span_attributes: serde_json::from_str(&row.span_attributes)
                .unwrap_or(serde_json::Value::Null),
            resource_attributes: serde_json::from_str(&row.resource_attributes)
                .unwrap_or(serde_json::Value::Null),
            usage_details: row.usage_details.iter().cloned().collect(),
            cost_details: money_map(&row.cost_details),
            pricing_snapshot: money_map(&row.pricing_snapshot),
            total_cost: row.total_cost.map(ids::money_from_raw),
            has_error: row.has_error != 0,
            input_blob_id: (!row.input_blob_id.is_empty()).then_some(row.input_blob_id),
            output_blob_id: (!row.output_blob_id.is_empty()).then_some(row.output_blob_id),
            trace_id: row.trace_id,
            span_id: row.span_id,
            parent_span_id: row.parent_span_id,
            project_id: row.project_id,
            span_name: row.span_name,
            span_kind: row.span_kind,
            duration_nano: row.duration_nano,
            status_code: row.status_code,
            status_message: row.status_message,
            input: row.input,
            output: row.output,
            service_name: row.service_name,
            model_name: row.model_name,
            provider_name: row.provider_name,
            span_type: row.span_type,
            level: row.level,
            version: row.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingest_fixture() -> SpanIngest {
        SpanIngest {
            trace_id: "aa".repeat(16),
            span_id: "0123456789abcdef".to_string(),
            parent_span_id: None,
            trace_state: None,
            span_name: "chat.completion".to_string(),
            span_kind: 3,
            start_time: "2026-01-02T03:04:05Z".to_string(),
            end_time: Some("2026-01-02T03:04:06.5Z".to_string()),
            completion_start_time: None,
            status_code: 2,
            status_message: Some("upstream timeout".to_string()),
            input: Some("hello".to_string()),
            output: None,
            resource_attributes: HashMap::from([
                (ATTR_SERVICE_NAME.to_string(), "gateway".to_string()),
                (ATTR_ENVIRONMENT.to_string(), "prod".to_string()),
            ]),
            span_attributes: HashMap::from([
                (ATTR_MODEL_NAME.to_string(), "gpt-4o-mini".to_string()),
                (ATTR_PROVIDER_NAME.to_string(), "openai".to_string()),
                (ATTR_SPAN_TYPE.to_string(), "llm".to_string()),
                (ATTR_USER_ID.to_string(), "u-1".to_string()),
            ]),
            scope_name: None,
            scope_version: None,
            scope_attributes: HashMap::new(),
            resource_schema_url: None,
            scope_schema_url: None,
            usage_details: HashMap::from([
                ("input".to_string(), 1000),
                ("output".to_string(), 500),
            ]),
            events: vec![SpanEvent {
                timestamp: "2026-01-02T03:04:05.1Z".to_string(),
                name: "gen_ai.content.prompt".to_string(),
                attributes: serde_json::json!({"tokens": 1000}),
            }],
            links: vec![],
        }
    }

    #[test]
    fn test_into_row_derives_duration_and_error() {
        let row = ingest_fixture().into_row("proj-1", 1).unwrap();
        assert_eq!(row.duration_nano, 1_500_000_000);
        assert_eq!(row.has_error, 1);
        assert!(row.is_root());
        row.check_array_lengths().unwrap();
    }

    #[test]
    fn test_into_row_materializes_columns() {
        let row = ingest_fixture().into_row("proj-1", 1).unwrap();
        assert_eq!(row.service_name, "gateway");
        assert_eq!(row.model_name, "gpt-4o-mini");
        assert_eq!(row.provider_name, "openai");
        assert_eq!(row.span_type, "llm");
        assert_eq!(row.environment, "prod");
        assert_eq!(row.user_id, "u-1");
        assert_eq!(row.level, "");
    }

    #[test]
    fn test_into_row_flattens_events() {
        let row = ingest_fixture().into_row("proj-1", 1).unwrap();
        assert_eq!(row.events_name, vec!["gen_ai.content.prompt"]);
        assert_eq!(row.events_timestamp.len(), 1);
        let events = row.events();
        assert_eq!(events[0].name, "gen_ai.content.prompt");
        assert_eq!(events[0].attributes["tokens"], 1000);
    }

    #[test]
    fn test_into_row_rejects_bad_ids() {
        let mut bad = ingest_fixture();
        bad.trace_id = "short".to_string();
        assert!(bad.into_row("proj-1", 1).is_err());

        let mut bad = ingest_fixture();
        bad.span_kind = 9;
        assert!(bad.into_row("proj-1", 1).is_err());

        let mut bad = ingest_fixture();
        bad.status_code = 7;
        assert!(bad.into_row("proj-1", 1).is_err());
    }

    #[test]
    fn test_into_row_rejects_inverted_times() {
        let mut bad = ingest_fixture();
        bad.end_time = Some("2026-01-02T03:04:04Z".to_string());
        assert!(bad.into_row("proj-1", 1).is_err());
    }

    #[test]
    fn test_no_end_time_means_open_span() {
        let mut open = ingest_fixture();
        open.end_time = None;
        open.status_code = 0;
        open.status_message = None;
        let row = open.into_row("proj-1", 1).unwrap();
        assert_eq!(row.duration_nano, 0);
        assert_eq!(row.end_time, None);
        assert_eq!(row.has_error, 0);
    }

    #[test]
    fn test_ragged_arrays_detected() {
        let mut row = ingest_fixture().into_row("proj-1", 1).unwrap();
        row.events_name.push("orphan".to_string());
        assert!(row.check_array_lengths().is_err());
    }

    #[test]
    fn test_response_money_conversion() {
        let mut row = ingest_fixture().into_row("proj-1", 1).unwrap();
        row.total_cost = Some(2_500_000_000);
        row.cost_details = vec![("total".to_string(), 2_500_000_000)];
        let resp = SpanResponse::from(row);
        assert_eq!(
            resp.total_cost.unwrap().to_string(),
            "0.002500000000"
        );
        assert_eq!(
            resp.cost_details["total"].to_string(),
            "0.002500000000"
        );
    }
}
