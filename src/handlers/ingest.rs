use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::error::CoreError;
use crate::models::batch::IngestRequest;

/// Accept a producer batch: dedup, enrich, persist, report.
pub async fn ingest_batch(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let response = state.ingest.process_batch(request).await?;
    Ok(Json(response))
}
