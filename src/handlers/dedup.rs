use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::AppState;
use crate::error::CoreError;
use crate::ids;

/// Owning batch and approximate expiry of a claim key. The id is the OTLP
/// composite `trace_id:span_id`.
pub async fn get_claim(
    State(state): State<AppState>,
    Path(dedup_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    ids::split_dedup_id(&dedup_id)?;
    let claim = state.dedup.get_by_event_id(&dedup_id).await?;
    Ok(Json(serde_json::json!({
        "batch_id": claim.batch_id,
        "expires_in_ms": claim.expires_in.map(|d| d.as_millis() as u64),
    })))
}

pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CoreError> {
    let stats = state.dedup.stats().await?;
    Ok(Json(stats))
}
