use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::CoreError;
use crate::models::batch::BatchStatus;

pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let batch = state.meta.get_batch(&id)?.ok_or(CoreError::NotFound("batch"))?;
    Ok(Json(batch))
}

#[derive(Debug, Deserialize)]
pub struct ListBatchesParams {
    pub project_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

pub async fn list_batches(
    State(state): State<AppState>,
    Query(params): Query<ListBatchesParams>,
) -> Result<impl IntoResponse, CoreError> {
    let status = params
        .status
        .as_deref()
        .map(BatchStatus::parse)
        .transpose()
        .map_err(|_| {
            CoreError::Validation(format!(
                "unknown batch status {:?}",
                params.status.as_deref().unwrap_or_default()
            ))
        })?;
    let limit = state.config.page_size(params.limit);
    let batches = state.meta.list_batches(&params.project_id, status, limit)?;
    Ok(Json(serde_json::json!({ "batches": batches })))
}

pub async fn list_batch_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    state.meta.get_batch(&id)?.ok_or(CoreError::NotFound("batch"))?;
    let events = state.meta.list_batch_events(&id)?;
    Ok(Json(serde_json::json!({ "events": events })))
}

/// Re-run the eligible failed events of a batch.
pub async fn retry_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let report = state.ingest.retry_batch(&id).await?;
    Ok(Json(report))
}
