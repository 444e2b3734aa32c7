use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::rfc3339_to_nanos;
use crate::models::span::SpanFilter;
use crate::models::trace::TraceFilter;

/// Escape a string for embedding in a single-quoted ClickHouse literal.
pub fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn quote(value: &str) -> String {
    format!("'{}'", escape(value))
}

/// Duration filters arrive in milliseconds; the stored column is
/// nanoseconds.
pub fn ms_to_nanos(ms: u64) -> u64 {
    ms * 1_000_000
}

/// Render an RFC 3339 timestamp as a DateTime64(9) predicate value. The
/// input is parsed first so arbitrary text can never reach the SQL string.
pub fn time_literal(value: &str) -> CoreResult<String> {
    let nanos = rfc3339_to_nanos(value)?;
    Ok(format!("fromUnixTimestamp64Nano({nanos})"))
}

/// Render a monetary bound as a Decimal64(12) literal. Decimal's display
/// form contains only digits, sign, and a dot, so it embeds safely.
pub fn money_literal(value: rust_decimal::Decimal) -> String {
    format!("toDecimal64('{value}', {})", ids::MONEY_SCALE)
}

/// Sortable columns on the span surface.
const SPAN_SORT_FIELDS: &[&str] = &[
    "start_time",
    "end_time",
    "duration_nano",
    "span_name",
    "service_name",
    "model_name",
    "total_cost",
    "status_code",
];

/// Sortable columns on the trace listing surface (aggregate aliases).
const TRACE_SORT_FIELDS: &[&str] = &[
    "start_time",
    "end_time",
    "duration_nano",
    "total_cost",
    "span_count",
    "total_tokens",
    "root_span_name",
];

/// Sortable columns on the score surface.
const SCORE_SORT_FIELDS: &[&str] = &["timestamp", "name", "value", "source"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortEntity {
    Span,
    Trace,
    Score,
}

/// Validate `sort_by`/`sort_dir` against the per-entity whitelist and render
/// an ORDER BY clause with a stable secondary sort. Identifiers are never
/// concatenated from user input without passing this check.
pub fn order_by(
    entity: SortEntity,
    sort_by: Option<&str>,
    sort_dir: Option<&str>,
) -> CoreResult<String> {
    let (fields, default_field, tiebreak) = match entity {
        SortEntity::Span => (SPAN_SORT_FIELDS, "start_time", "span_id"),
        SortEntity::Trace => (TRACE_SORT_FIELDS, "start_time", "trace_id"),
        SortEntity::Score => (SCORE_SORT_FIELDS, "timestamp", "score_id"),
    };
    let field = match sort_by {
        None => default_field,
        Some(requested) => fields
            .iter()
            .copied()
            .find(|f| *f == requested)
            .ok_or_else(|| {
                CoreError::Validation(format!("unknown sort field {requested:?}"))
            })?,
    };
    let dir = match sort_dir {
        None => "DESC",
        Some("asc") => "ASC",
        Some("desc") => "DESC",
        Some(other) => {
            return Err(CoreError::Validation(format!(
                "sort_dir must be asc|desc, got {other:?}"
            )));
        }
    };
    Ok(format!("ORDER BY {field} {dir}, {tiebreak} ASC"))
}

/// Build the WHERE conditions for a span filter (§4.4). Every predicate
/// hits a materialized column, never a map lookup.
pub fn span_conditions(filter: &SpanFilter) -> CoreResult<Vec<String>> {
    if filter.project_id.is_empty() {
        return Err(CoreError::Validation("project_id is required".to_string()));
    }
    let mut conditions = vec![
        format!("project_id = {}", quote(&filter.project_id)),
        "deleted_at IS NULL".to_string(),
    ];
    if let Some(trace_id) = &filter.trace_id {
        ids::validate_trace_id(trace_id)?;
        conditions.push(format!("trace_id = {}", quote(&trace_id.to_ascii_lowercase())));
    }
    if let Some(parent) = &filter.parent_span_id {
        ids::validate_span_id(parent)?;
        conditions.push(format!(
            "parent_span_id = {}",
            quote(&parent.to_ascii_lowercase())
        ));
    }
    if let Some(span_type) = &filter.span_type {
        conditions.push(format!("span_type = {}", quote(span_type)));
    }
    if let Some(kind) = filter.span_kind {
        if kind > 5 {
            return Err(CoreError::Validation(format!(
                "span_kind must be 0..5, got {kind}"
            )));
        }
        conditions.push(format!("span_kind = {kind}"));
    }
    if let Some(model) = &filter.model_name {
        conditions.push(format!("model_name = {}", quote(model)));
    }
    if let Some(service) = &filter.service_name {
        conditions.push(format!("service_name = {}", quote(service)));
    }
    if let Some(level) = &filter.level {
        conditions.push(format!("level = {}", quote(level)));
    }
    if let Some(from) = &filter.start_time_from {
        conditions.push(format!("start_time >= {}", time_literal(from)?));
    }
    if let Some(to) = &filter.start_time_to {
        conditions.push(format!("start_time <= {}", time_literal(to)?));
    }
    if let Some(min_ms) = filter.min_duration_ms {
        conditions.push(format!("duration_nano >= {}", ms_to_nanos(min_ms)));
    }
    if let Some(max_ms) = filter.max_duration_ms {
        conditions.push(format!("duration_nano <= {}", ms_to_nanos(max_ms)));
    }
    if let Some(min_cost) = filter.min_total_cost {
        conditions.push(format!("total_cost >= {}", money_literal(min_cost)));
    }
    if let Some(max_cost) = filter.max_total_cost {
        conditions.push(format!("total_cost <= {}", money_literal(max_cost)));
    }
    if let Some(is_completed) = filter.is_completed {
        conditions.push(if is_completed {
            "end_time IS NOT NULL".to_string()
        } else {
            "end_time IS NULL".to_string()
        });
    }
    Ok(conditions)
}

/// WHERE predicates for a trace listing: only span-level conditions every
/// span of a trace shares. Trace-level conditions must go through
/// `trace_having`; pushing them here would drop non-root spans from
/// matching traces and distort the aggregates.
pub fn trace_where(filter: &TraceFilter) -> CoreResult<Vec<String>> {
    if filter.project_id.is_empty() {
        return Err(CoreError::Validation("project_id is required".to_string()));
    }
    let mut conditions = vec![
        format!("project_id = {}", quote(&filter.project_id)),
        "deleted_at IS NULL".to_string(),
    ];
    if let Some(from) = &filter.start_time_from {
        conditions.push(format!("start_time >= {}", time_literal(from)?));
    }
    if let Some(to) = &filter.start_time_to {
        conditions.push(format!("start_time <= {}", time_literal(to)?));
    }
    Ok(conditions)
}

/// HAVING predicates for a trace listing: trace-level conditions evaluated
/// against the aggregate projection (root-span metadata and sums).
pub fn trace_having(filter: &TraceFilter) -> CoreResult<Vec<String>> {
    let mut conditions = Vec::new();
    if let Some(user_id) = &filter.user_id {
        conditions.push(format!("user_id = {}", quote(user_id)));
    }
    if let Some(session_id) = &filter.session_id {
        conditions.push(format!("session_id = {}", quote(session_id)));
    }
    if let Some(service) = &filter.service_name {
        conditions.push(format!("service_name = {}", quote(service)));
    }
    if let Some(model) = &filter.model_name {
        conditions.push(format!("model_name = {}", quote(model)));
    }
    if let Some(provider) = &filter.provider_name {
        conditions.push(format!("provider_name = {}", quote(provider)));
    }
    if let Some(status_code) = filter.status_code {
        if status_code > 2 {
            return Err(CoreError::Validation(format!(
                "status_code must be 0..2, got {status_code}"
            )));
        }
        conditions.push(format!("status_code = {status_code}"));
    }
    if let Some(has_error) = filter.has_error {
        conditions.push(format!("has_error = {}", u8::from(has_error)));
    }
    if let Some(min_cost) = filter.min_total_cost {
        conditions.push(format!("total_cost >= {}", money_literal(min_cost)));
    }
    if let Some(max_cost) = filter.max_total_cost {
        conditions.push(format!("total_cost <= {}", money_literal(max_cost)));
    }
    if let Some(min_tokens) = filter.min_total_tokens {
        conditions.push(format!("total_tokens >= {min_tokens}"));
    }
    if let Some(max_tokens) = filter.max_total_tokens {
        conditions.push(format!("total_tokens <= {max_tokens}"));
    }
    if let Some(min_ms) = filter.min_duration_ms {
        conditions.push(format!("duration_nano >= {}", ms_to_nanos(min_ms)));
    }
    if let Some(max_ms) = filter.max_duration_ms {
        conditions.push(format!("duration_nano <= {}", ms_to_nanos(max_ms)));
    }
    Ok(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("it's"), "it\\'s");
        assert_eq!(escape("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_ms_to_nanos() {
        assert_eq!(ms_to_nanos(250), 250_000_000);
    }

    #[test]
    fn test_sort_injection_rejected() {
        let err = order_by(SortEntity::Span, Some("name; DROP TABLE otel_traces"), None);
        assert!(matches!(err, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_sort_defaults() {
        assert_eq!(
            order_by(SortEntity::Trace, None, None).unwrap(),
            "ORDER BY start_time DESC, trace_id ASC"
        );
    }

    #[test]
    fn test_sort_dir_validated() {
        assert!(order_by(SortEntity::Score, Some("value"), Some("sideways")).is_err());
        assert_eq!(
            order_by(SortEntity::Score, Some("value"), Some("asc")).unwrap(),
            "ORDER BY value ASC, score_id ASC"
        );
    }

    #[test]
    fn test_span_conditions_duration_conversion() {
        let filter = SpanFilter {
            project_id: "p1".to_string(),
            min_duration_ms: Some(100),
            ..Default::default()
        };
        let conditions = span_conditions(&filter).unwrap();
        assert!(conditions.contains(&"duration_nano >= 100000000".to_string()));
    }

    #[test]
    fn test_span_conditions_requires_project() {
        assert!(span_conditions(&SpanFilter::default()).is_err());
    }

    #[test]
    fn test_span_conditions_escapes_values() {
        let filter = SpanFilter {
            project_id: "p'1".to_string(),
            ..Default::default()
        };
        let conditions = span_conditions(&filter).unwrap();
        assert!(conditions.contains(&"project_id = 'p\\'1'".to_string()));
    }

    #[test]
    fn test_trace_level_filters_are_having_not_where() {
        let filter = TraceFilter {
            project_id: "p1".to_string(),
            user_id: Some("u-9".to_string()),
            min_total_tokens: Some(10),
            ..Default::default()
        };
        let where_conds = trace_where(&filter).unwrap();
        let having_conds = trace_having(&filter).unwrap();
        assert!(where_conds.iter().all(|c| !c.contains("user_id")));
        assert!(having_conds.contains(&"user_id = 'u-9'".to_string()));
        assert!(having_conds.contains(&"total_tokens >= 10".to_string()));
    }

    #[test]
    fn test_trace_where_keeps_span_level_predicates() {
        let filter = TraceFilter {
            project_id: "p1".to_string(),
            start_time_from: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let where_conds = trace_where(&filter).unwrap();
        assert_eq!(where_conds.len(), 3);
        assert!(where_conds[2].starts_with("start_time >= fromUnixTimestamp64Nano("));
    }

    #[test]
    fn test_time_literal_rejects_injection() {
        assert!(time_literal("2026-01-01T00:00:00Z').bad").is_err());
    }

    #[test]
    fn test_money_predicate_is_decimal_literal() {
        let filter = SpanFilter {
            project_id: "p1".to_string(),
            min_total_cost: Some(rust_decimal::Decimal::new(25, 4)),
            ..Default::default()
        };
        let conditions = span_conditions(&filter).unwrap();
        assert!(conditions.contains(&"total_cost >= toDecimal64('0.0025', 12)".to_string()));
    }
}
