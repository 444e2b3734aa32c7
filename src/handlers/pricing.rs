use axum::{Json, extract::Query, extract::State, response::IntoResponse};
use serde::Deserialize;

use crate::AppState;
use crate::error::CoreError;

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub model: String,
    pub project_id: String,
    /// Optional RFC 3339 timestamp for historical resolution.
    #[serde(default)]
    pub at: Option<String>,
}

/// Read-only pricing resolution: which row would ingest apply for this
/// model right now (or at a given time).
pub async fn resolve_pricing(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Result<impl IntoResponse, CoreError> {
    let pricing = match params.at.as_deref() {
        Some(at) => {
            let at = chrono::DateTime::parse_from_rfc3339(at)
                .map_err(|e| CoreError::Validation(format!("bad at {at:?}: {e}")))?
                .with_timezone(&chrono::Utc);
            state
                .pricing
                .find_historical_pricing(&params.model, &params.project_id, at)?
        }
        None => state
            .pricing
            .find_by_model_name(&params.model, &params.project_id)?,
    };
    Ok(Json(pricing))
}
