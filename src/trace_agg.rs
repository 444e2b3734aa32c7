use clickhouse::{Client, Row};
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::query::CountRow;
use crate::models::trace::{FilterOptions, NumericRange, TraceFilter, TraceSummaryRow};
use crate::query_builder::{self, SortEntity};

/// Aggregate projection in `TraceSummaryRow` field order. Root-span
/// metadata comes out of the group via `anyIf` on the empty-parent
/// condition; the trace duration is the root span's own duration rather
/// than `max(end) - min(start)`, which would absorb clock skew between
/// services.
const SUMMARY_PROJECTION: &str = "trace_id, \
     anyIf(span_id, parent_span_id = '') AS root_span_id, \
     anyIf(span_name, parent_span_id = '') AS root_span_name, \
     anyIf(service_name, parent_span_id = '') AS service_name, \
     anyIf(model_name, parent_span_id = '') AS model_name, \
     anyIf(provider_name, parent_span_id = '') AS provider_name, \
     anyIf(user_id, parent_span_id = '') AS user_id, \
     anyIf(session_id, parent_span_id = '') AS session_id, \
     anyIf(environment, parent_span_id = '') AS environment, \
     anyIf(status_code, parent_span_id = '') AS status_code, \
     min(start_time) AS start_time, \
     max(end_time) AS end_time, \
     anyIf(duration_nano, parent_span_id = '') AS duration_nano, \
     count() AS span_count, \
     countIf(has_error = 1) AS error_span_count, \
     max(has_error) AS has_error, \
     toNullable(toDecimal64(sum(total_cost), 12)) AS total_cost, \
     sum(usage_details['input']) AS input_tokens, \
     sum(usage_details['output']) AS output_tokens, \
     sum(usage_details['total']) AS total_tokens";

/// Derives trace-level summaries from spans on demand via a single grouped
/// scan (§4.5). Traces are never stored as rows.
#[derive(Clone)]
pub struct TraceAggregator {
    ch: Client,
}

impl TraceAggregator {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }

    /// The deduplicated span set feeding every aggregate: latest row per
    /// span id under the given WHERE conditions.
    fn span_set(conditions: &[String]) -> String {
        format!(
            "(SELECT * FROM otel_traces WHERE {} ORDER BY event_ts DESC LIMIT 1 BY span_id)",
            conditions.join(" AND "),
        )
    }

    pub async fn get_trace_summary(&self, trace_id: &str) -> CoreResult<TraceSummaryRow> {
        ids::validate_trace_id(trace_id)?;
        let conditions = vec![
            format!(
                "trace_id = {}",
                query_builder::quote(&trace_id.to_ascii_lowercase())
            ),
            "deleted_at IS NULL".to_string(),
        ];
        let sql = format!(
            "SELECT {SUMMARY_PROJECTION} FROM {} GROUP BY trace_id",
            Self::span_set(&conditions),
        );
        let row = self
            .ch
            .query(&sql)
            .fetch_optional::<TraceSummaryRow>()
            .await?;
        row.ok_or(CoreError::NotFound("trace"))
    }

    /// The grouped query shared by list and count: WHERE narrows the span
    /// set before aggregation, HAVING filters the aggregated traces.
    fn grouped_sql(filter: &TraceFilter) -> CoreResult<String> {
        let where_conditions = query_builder::trace_where(filter)?;
        let having_conditions = query_builder::trace_having(filter)?;
        let having = if having_conditions.is_empty() {
            String::new()
        } else {
            format!(" HAVING {}", having_conditions.join(" AND "))
        };
        Ok(format!(
            "SELECT {SUMMARY_PROJECTION} FROM {} GROUP BY trace_id{having}",
            Self::span_set(&where_conditions),
        ))
    }

    pub async fn list_traces(
        &self,
        filter: &TraceFilter,
        page_size: u64,
    ) -> CoreResult<Vec<TraceSummaryRow>> {
        let order = query_builder::order_by(
            SortEntity::Trace,
            filter.sort_by.as_deref(),
            filter.sort_dir.as_deref(),
        )?;
        let sql = format!(
            "{} {order} LIMIT {page_size} OFFSET {}",
            Self::grouped_sql(filter)?,
            filter.offset,
        );
        Ok(self.ch.query(&sql).fetch_all::<TraceSummaryRow>().await?)
    }

    pub async fn count_traces(&self, filter: &TraceFilter) -> CoreResult<u64> {
        let sql = format!(
            "SELECT count() AS count FROM ({})",
            Self::grouped_sql(filter)?,
        );
        let row = self.ch.query(&sql).fetch_one::<CountRow>().await?;
        Ok(row.count)
    }

    /// Distinct root-span values and numeric ranges for the listing UI,
    /// driven by the same grouped projection.
    pub async fn get_filter_options(&self, project_id: &str) -> CoreResult<FilterOptions> {
        if project_id.is_empty() {
            return Err(CoreError::Validation("project_id is required".to_string()));
        }
        let filter = TraceFilter {
            project_id: project_id.to_string(),
            ..Default::default()
        };
        let sql = format!(
            "SELECT \
                 groupUniqArray(1000)(model_name) AS models, \
                 groupUniqArray(1000)(provider_name) AS providers, \
                 groupUniqArray(1000)(service_name) AS services, \
                 groupUniqArray(1000)(environment) AS environments, \
                 groupUniqArray(1000)(user_id) AS users, \
                 groupUniqArray(1000)(session_id) AS sessions, \
                 min(toFloat64(ifNull(total_cost, toDecimal64(0, 12)))) AS cost_min, \
                 max(toFloat64(ifNull(total_cost, toDecimal64(0, 12)))) AS cost_max, \
                 min(toFloat64(total_tokens)) AS tokens_min, \
                 max(toFloat64(total_tokens)) AS tokens_max, \
                 min(duration_nano / 1000000) AS duration_ms_min, \
                 max(duration_nano / 1000000) AS duration_ms_max \
             FROM ({})",
            Self::grouped_sql(&filter)?,
        );
        let row = self
            .ch
            .query(&sql)
            .fetch_optional::<FilterOptionsRow>()
            .await?
            .unwrap_or_default();

        let clean = |mut values: Vec<String>| {
            values.retain(|v| !v.is_empty());
            values.sort();
            values
        };
        Ok(FilterOptions {
            models: clean(row.models),
            providers: clean(row.providers),
            services: clean(row.services),
            environments: clean(row.environments),
            users: clean(row.users),
            sessions: clean(row.sessions),
            cost_range: NumericRange {
                min: row.cost_min,
                max: row.cost_max,
            },
            token_range: NumericRange {
                min: row.tokens_min,
                max: row.tokens_max,
            },
            duration_ms_range: NumericRange {
                min: row.duration_ms_min,
                max: row.duration_ms_max,
            },
        })
    }
}

#[derive(Debug, Default, Deserialize, Row)]
struct FilterOptionsRow {
    models: Vec<String>,
    providers: Vec<String>,
    services: Vec<String>,
    environments: Vec<String>,
    users: Vec<String>,
    sessions: Vec<String>,
    cost_min: f64,
    cost_max: f64,
    tokens_min: f64,
    tokens_max: f64,
    duration_ms_min: f64,
    duration_ms_max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_sql_splits_where_and_having() {
        let filter = TraceFilter {
            project_id: "p1".to_string(),
            start_time_from: Some("2026-01-01T00:00:00Z".to_string()),
            user_id: Some("u-9".to_string()),
            has_error: Some(true),
            ..Default::default()
        };
        let sql = TraceAggregator::grouped_sql(&filter).unwrap();
        let (where_part, having_part) = sql.split_once(" HAVING ").unwrap();
        // span-level predicates stay ahead of the aggregation
        assert!(where_part.contains("project_id = 'p1'"));
        assert!(where_part.contains("start_time >= fromUnixTimestamp64Nano("));
        assert!(!where_part.contains("user_id = 'u-9'"));
        // trace-level predicates apply after it
        assert!(having_part.contains("user_id = 'u-9'"));
        assert!(having_part.contains("has_error = 1"));
    }

    #[test]
    fn test_grouped_sql_no_having_when_unfiltered() {
        let filter = TraceFilter {
            project_id: "p1".to_string(),
            ..Default::default()
        };
        let sql = TraceAggregator::grouped_sql(&filter).unwrap();
        assert!(!sql.contains("HAVING"));
        assert!(sql.contains("GROUP BY trace_id"));
    }

    #[test]
    fn test_summary_projection_field_order() {
        // column aliases must line up with TraceSummaryRow's field order
        let expected = [
            "root_span_id",
            "root_span_name",
            "service_name",
            "model_name",
            "provider_name",
            "user_id",
            "session_id",
            "environment",
            "status_code",
            "start_time",
            "end_time",
            "duration_nano",
            "span_count",
            "error_span_count",
            "has_error",
            "total_cost",
            "input_tokens",
            "output_tokens",
            "total_tokens",
        ];
        assert!(SUMMARY_PROJECTION.starts_with("trace_id"));
        let mut last = 0;
        for alias in expected {
            let marker = format!(" AS {alias}");
            let pos = SUMMARY_PROJECTION
                .find(&marker)
                .unwrap_or_else(|| panic!("missing alias {alias}"));
            assert!(pos > last, "alias {alias} out of order");
            last = pos;
        }
    }
}
