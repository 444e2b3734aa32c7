use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::CoreError;
use crate::models::trace::{TraceFilter, TraceSummary, assemble_tree};

/// Fetch a trace as its reconstructed span tree.
pub async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let rows = state.spans.get_by_trace_id(&trace_id).await?;
    if rows.is_empty() {
        return Err(CoreError::NotFound("trace"));
    }
    Ok(Json(assemble_tree(&trace_id.to_ascii_lowercase(), rows)))
}

/// Trace-level aggregation derived on demand from the span set.
pub async fn get_trace_summary(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let row = state.traces.get_trace_summary(&trace_id).await?;
    Ok(Json(TraceSummary::from(row)))
}

/// Filtered trace listing: span-level predicates narrow before
/// aggregation, trace-level predicates apply after it, so span counts and
/// sums stay whole.
pub async fn query_traces(
    State(state): State<AppState>,
    Json(filter): Json<TraceFilter>,
) -> Result<impl IntoResponse, CoreError> {
    let page_size = state.config.page_size(filter.limit);
    let total = state.traces.count_traces(&filter).await?;
    let rows = state.traces.list_traces(&filter, page_size).await?;
    let traces: Vec<TraceSummary> = rows.into_iter().map(TraceSummary::from).collect();
    Ok(Json(serde_json::json!({ "traces": traces, "total": total })))
}

#[derive(Debug, Deserialize)]
pub struct FilterOptionsParams {
    pub project_id: String,
}

pub async fn get_filter_options(
    State(state): State<AppState>,
    Query(params): Query<FilterOptionsParams>,
) -> Result<impl IntoResponse, CoreError> {
    let options = state.traces.get_filter_options(&params.project_id).await?;
    Ok(Json(options))
}
