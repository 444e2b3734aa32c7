use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::CoreError;
use crate::models::relational::CreateQualityScoreRequest;

pub async fn create_quality_score(
    State(state): State<AppState>,
    Json(request): Json<CreateQualityScoreRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let score = state.meta.create_quality_score(&request)?;
    Ok((StatusCode::CREATED, Json(score)))
}

pub async fn get_quality_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let score = state
        .meta
        .get_quality_score(&id)?
        .ok_or(CoreError::NotFound("quality score"))?;
    Ok(Json(score))
}

#[derive(Debug, Deserialize)]
pub struct ListQualityParams {
    pub project_id: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

pub async fn list_quality_scores(
    State(state): State<AppState>,
    Query(params): Query<ListQualityParams>,
) -> Result<impl IntoResponse, CoreError> {
    let limit = state.config.page_size(params.limit);
    let scores =
        state
            .meta
            .list_quality_scores(&params.project_id, params.trace_id.as_deref(), limit)?;
    Ok(Json(serde_json::json!({ "scores": scores })))
}

pub async fn delete_quality_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    if !state.meta.delete_quality_score(&id)? {
        return Err(CoreError::NotFound("quality score"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    pub project_id: String,
}

pub async fn aggregate_quality_scores(
    State(state): State<AppState>,
    Query(params): Query<AggregateParams>,
) -> Result<impl IntoResponse, CoreError> {
    let aggregates = state.meta.aggregate_quality_scores(&params.project_id)?;
    Ok(Json(serde_json::json!({ "aggregates": aggregates })))
}

#[derive(Debug, Deserialize)]
pub struct DistributionParams {
    pub project_id: String,
    pub name: String,
    #[serde(default = "default_bins")]
    pub bins: usize,
}

fn default_bins() -> usize {
    10
}

pub async fn quality_score_distribution(
    State(state): State<AppState>,
    Query(params): Query<DistributionParams>,
) -> Result<impl IntoResponse, CoreError> {
    let buckets =
        state
            .meta
            .quality_score_distribution(&params.project_id, &params.name, params.bins)?;
    Ok(Json(serde_json::json!({ "buckets": buckets })))
}
