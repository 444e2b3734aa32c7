use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;
use crate::models::query::CountRow;

/// Liveness plus reachability of the three backing stores.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let columnar = state
        .ch
        .query("SELECT toUInt64(1) AS count")
        .fetch_one::<CountRow>()
        .await
        .is_ok();
    let relational = state.meta.ping().is_ok();
    let cache = state.dedup.stats().await.is_ok();

    let healthy = columnar && relational && cache;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "columnar": columnar,
            "relational": relational,
            "cache": cache,
        })),
    )
}
