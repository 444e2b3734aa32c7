use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::CoreError;
use crate::models::blob::BlobRefIngest;

#[derive(Debug, Deserialize)]
pub struct EntityParams {
    pub project_id: String,
    pub entity_type: String,
    pub entity_id: String,
}

/// Register a blob reference for a payload uploaded outside this core.
pub async fn record_blob(
    State(state): State<AppState>,
    Json(request): Json<BlobRefIngest>,
) -> Result<impl IntoResponse, CoreError> {
    let row = state.blobs.record(&request).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn list_blobs(
    State(state): State<AppState>,
    Query(params): Query<EntityParams>,
) -> Result<impl IntoResponse, CoreError> {
    let blobs = state
        .blobs
        .list_by_entity(&params.project_id, &params.entity_type, &params.entity_id)
        .await?;
    Ok(Json(serde_json::json!({ "blobs": blobs })))
}

pub async fn get_blob(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(params): Query<EntityParams>,
) -> Result<impl IntoResponse, CoreError> {
    let blob = state
        .blobs
        .get(
            &params.project_id,
            &params.entity_type,
            &params.entity_id,
            &event_id,
        )
        .await?;
    Ok(Json(blob))
}

pub async fn delete_blob(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(params): Query<EntityParams>,
) -> Result<impl IntoResponse, CoreError> {
    state
        .blobs
        .soft_delete(
            &params.project_id,
            &params.entity_type,
            &params.entity_id,
            &event_id,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
