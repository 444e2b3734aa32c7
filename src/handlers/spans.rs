use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::CoreError;
use crate::models::span::{SpanFilter, SpanResponse};

pub async fn get_span(
    State(state): State<AppState>,
    Path(span_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let row = state.spans.get_by_id(&span_id).await?;
    Ok(Json(SpanResponse::from(row)))
}

pub async fn get_children(
    State(state): State<AppState>,
    Path(span_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let rows = state.spans.get_children(&span_id).await?;
    let spans: Vec<SpanResponse> = rows.into_iter().map(SpanResponse::from).collect();
    Ok(Json(serde_json::json!({ "spans": spans })))
}

/// Filtered span listing with count for pagination.
pub async fn query_spans(
    State(state): State<AppState>,
    Json(filter): Json<SpanFilter>,
) -> Result<impl IntoResponse, CoreError> {
    let page_size = state.config.page_size(filter.limit);
    let total = state.spans.count(&filter).await?;
    let rows = state.spans.get_by_filter(&filter, page_size).await?;
    let spans: Vec<SpanResponse> = rows.into_iter().map(SpanResponse::from).collect();
    Ok(Json(serde_json::json!({ "spans": spans, "total": total })))
}

/// Asynchronous logical delete; the span disappears from reads immediately
/// via the `deleted_at` filter.
pub async fn delete_span(
    State(state): State<AppState>,
    Path(span_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    state.spans.get_by_id(&span_id).await?;
    state.spans.soft_delete(&span_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
