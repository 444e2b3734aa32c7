use clickhouse::Row;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids;
use crate::models::nanos_to_string;
use crate::models::span::{SpanResponse, SpanRow};

/// One aggregated trace as projected by the grouped scan in the trace
/// aggregator. Never stored; derived from `otel_traces` on demand.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct TraceSummaryRow {
    pub trace_id: String,
    pub root_span_id: String,
    pub root_span_name: String,
    pub service_name: String,
    pub model_name: String,
    pub provider_name: String,
    pub user_id: String,
    pub session_id: String,
    pub environment: String,
    pub status_code: u8,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub duration_nano: u64,
    pub span_count: u64,
    pub error_span_count: u64,
    pub has_error: u8,
    pub total_cost: Option<i64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Trace summary as rendered on the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub root_span_id: String,
    pub root_span_name: String,
    pub service_name: String,
    pub model_name: String,
    pub provider_name: String,
    pub user_id: String,
    pub session_id: String,
    pub environment: String,
    pub status_code: u8,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_nano: u64,
    pub span_count: u64,
    pub error_span_count: u64,
    pub has_error: bool,
    pub total_cost: rust_decimal::Decimal,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl From<TraceSummaryRow> for TraceSummary {
    fn from(row: TraceSummaryRow) -> Self {
        TraceSummary {
            trace_id: row.trace_id,
            root_span_id: row.root_span_id,
            root_span_name: row.root_span_name,
            service_name: row.service_name,
            model_name: row.model_name,
            provider_name: row.provider_name,
            user_id: row.user_id,
            session_id: row.session_id,
            environment: row.environment,
            status_code: row.status_code,
            start_time: nanos_to_string(row.start_time),
            end_time: row.end_time.map(nanos_to_string),
            duration_nano: row.duration_nano,
            span_count: row.span_count,
            error_span_count: row.error_span_count,
            has_error: row.has_error != 0,
            total_cost: row.total_cost.map(ids::money_from_raw).unwrap_or_default(),
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            total_tokens: row.total_tokens,
        }
    }
}

/// Trace listing filter (§4.5). `project_id` and the start-time window are
/// span-level (WHERE-safe); everything else is trace-level and must be
/// applied post-aggregation (HAVING).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceFilter {
    pub project_id: String,
    #[serde(default)]
    pub start_time_from: Option<String>,
    #[serde(default)]
    pub start_time_to: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub status_code: Option<u8>,
    #[serde(default)]
    pub has_error: Option<bool>,
    #[serde(default)]
    pub min_total_cost: Option<rust_decimal::Decimal>,
    #[serde(default)]
    pub max_total_cost: Option<rust_decimal::Decimal>,
    #[serde(default)]
    pub min_total_tokens: Option<u64>,
    #[serde(default)]
    pub max_total_tokens: Option<u64>,
    #[serde(default)]
    pub min_duration_ms: Option<u64>,
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
}

/// A span node in the assembled trace tree.
#[derive(Debug, Clone, Serialize)]
pub struct SpanNode {
    #[serde(flatten)]
    pub span: SpanResponse,
    pub children: Vec<SpanNode>,
}

/// A fully assembled trace with nested span tree.
#[derive(Debug, Clone, Serialize)]
pub struct TraceTree {
    pub trace_id: String,
    pub spans: Vec<SpanNode>,
    pub span_count: usize,
}

/// Build the span tree from a flat list of spans. Children attach to their
/// parent by id; spans whose parent is absent from the set are treated as
/// roots so a partially-ingested trace still renders.
pub fn assemble_tree(trace_id: &str, rows: Vec<SpanRow>) -> TraceTree {
    let span_count = rows.len();
    let present: std::collections::HashSet<String> =
        rows.iter().map(|r| r.span_id.clone()).collect();

    let mut children_map: HashMap<String, Vec<usize>> = HashMap::new();
    let mut root_indices: Vec<usize> = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if row.is_root() || !present.contains(&row.parent_span_id) {
            root_indices.push(i);
        } else {
            children_map
                .entry(row.parent_span_id.clone())
                .or_default()
                .push(i);
        }
    }

    let nodes: Vec<SpanResponse> = rows.into_iter().map(SpanResponse::from).collect();

    fn build(
        index: usize,
        nodes: &[SpanResponse],
        children_map: &HashMap<String, Vec<usize>>,
    ) -> SpanNode {
        let span = nodes[index].clone();
        let mut children: Vec<SpanNode> = children_map
            .get(&span.span_id)
            .map(|ids| ids.iter().map(|&ci| build(ci, nodes, children_map)).collect())
            .unwrap_or_default();
        children.sort_by(|a, b| a.span.start_time.cmp(&b.span.start_time));
        SpanNode { span, children }
    }

    let spans: Vec<SpanNode> = root_indices
        .iter()
        .map(|&ri| build(ri, &nodes, &children_map))
        .collect();

    TraceTree {
        trace_id: trace_id.to_string(),
        spans,
        span_count,
    }
}

/// Distinct root-span values plus numeric ranges for the listing UI.
#[derive(Debug, Clone, Serialize, Default)]
pub struct FilterOptions {
    pub models: Vec<String>,
    pub providers: Vec<String>,
    pub services: Vec<String>,
    pub environments: Vec<String>,
    pub users: Vec<String>,
    pub sessions: Vec<String>,
    pub cost_range: NumericRange,
    pub token_range: NumericRange,
    pub duration_ms_range: NumericRange,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::span::SpanIngest;
    use std::collections::HashMap as Map;

    fn span(trace: &str, span_id: &str, parent: Option<&str>, start: &str) -> SpanRow {
        SpanIngest {
            trace_id: trace.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.map(|p| p.to_string()),
            trace_state: None,
            span_name: format!("op-{span_id}"),
            span_kind: 1,
            start_time: start.to_string(),
            end_time: None,
            completion_start_time: None,
            status_code: 0,
            status_message: None,
            input: None,
            output: None,
            resource_attributes: Map::new(),
            span_attributes: Map::new(),
            scope_name: None,
            scope_version: None,
            scope_attributes: Map::new(),
            resource_schema_url: None,
            scope_schema_url: None,
            usage_details: Map::new(),
            events: vec![],
            links: vec![],
        }
        .into_row("proj-1", 1)
        .unwrap()
    }

    #[test]
    fn test_assemble_tree_links_children() {
        let trace = "ab".repeat(16);
        let rows = vec![
            span(&trace, "aaaaaaaaaaaaaaaa", None, "2026-01-01T00:00:00Z"),
            span(
                &trace,
                "bbbbbbbbbbbbbbbb",
                Some("aaaaaaaaaaaaaaaa"),
                "2026-01-01T00:00:01Z",
            ),
            span(
                &trace,
                "cccccccccccccccc",
                Some("aaaaaaaaaaaaaaaa"),
                "2026-01-01T00:00:02Z",
            ),
        ];
        let tree = assemble_tree(&trace, rows);
        assert_eq!(tree.span_count, 3);
        assert_eq!(tree.spans.len(), 1);
        assert_eq!(tree.spans[0].children.len(), 2);
        assert_eq!(tree.spans[0].children[0].span.span_id, "bbbbbbbbbbbbbbbb");
    }

    #[test]
    fn test_assemble_tree_orphan_is_root() {
        let trace = "ab".repeat(16);
        let rows = vec![span(
            &trace,
            "bbbbbbbbbbbbbbbb",
            Some("aaaaaaaaaaaaaaaa"),
            "2026-01-01T00:00:01Z",
        )];
        let tree = assemble_tree(&trace, rows);
        assert_eq!(tree.spans.len(), 1);
        assert!(tree.spans[0].children.is_empty());
    }

    #[test]
    fn test_summary_defaults_missing_cost_to_zero() {
        let row = TraceSummaryRow {
            trace_id: "t".to_string(),
            root_span_id: "r".to_string(),
            root_span_name: "root".to_string(),
            service_name: String::new(),
            model_name: String::new(),
            provider_name: String::new(),
            user_id: String::new(),
            session_id: String::new(),
            environment: String::new(),
            status_code: 0,
            start_time: 0,
            end_time: None,
            duration_nano: 0,
            span_count: 1,
            error_span_count: 0,
            has_error: 0,
            total_cost: None,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        };
        let summary = TraceSummary::from(row);
        assert_eq!(summary.total_cost, rust_decimal::Decimal::ZERO);
        assert!(!summary.has_error);
    }
}
