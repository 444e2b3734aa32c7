use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::{CoreError, CoreResult};
use crate::models::query::{BucketInterval, TimeRangeParams, TimeWindow};
use crate::models::score::{ScoreFilter, ScoreIngest, ScoreResponse};

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Analytics windows are optional: absent params mean all time.
fn optional_window(
    preset: &Option<String>,
    from: &Option<String>,
    to: &Option<String>,
) -> CoreResult<Option<TimeWindow>> {
    if preset.is_none() && from.is_none() && to.is_none() {
        return Ok(None);
    }
    let params = TimeRangeParams {
        preset: preset.clone(),
        from: from.clone(),
        to: to.clone(),
    };
    params.resolve(chrono::Utc::now()).map(Some)
}

pub async fn create_score(
    State(state): State<AppState>,
    Json(ingest): Json<ScoreIngest>,
) -> Result<impl IntoResponse, CoreError> {
    let row = ingest.into_row(now_nanos())?;
    state.scores.create(&row).await?;
    Ok((StatusCode::CREATED, Json(ScoreResponse::from(row))))
}

#[derive(Debug, Deserialize)]
pub struct CreateScoreBatchRequest {
    pub scores: Vec<ScoreIngest>,
}

pub async fn create_score_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateScoreBatchRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let now = now_nanos();
    let rows = request
        .scores
        .into_iter()
        .map(|ingest| ingest.into_row(now))
        .collect::<CoreResult<Vec<_>>>()?;
    state.scores.create_batch(&rows).await?;
    let responses: Vec<ScoreResponse> = rows.into_iter().map(ScoreResponse::from).collect();
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "scores": responses })),
    ))
}

pub async fn get_score(
    State(state): State<AppState>,
    Path(score_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let row = state.scores.get_by_id(&score_id).await?;
    Ok(Json(ScoreResponse::from(row)))
}

/// Update re-appends under the same score id; the latest row wins on read.
pub async fn update_score(
    State(state): State<AppState>,
    Path(score_id): Path<String>,
    Json(mut ingest): Json<ScoreIngest>,
) -> Result<impl IntoResponse, CoreError> {
    state.scores.get_by_id(&score_id).await?;
    ingest.score_id = Some(score_id);
    let row = ingest.into_row(now_nanos())?;
    state.scores.update(&row).await?;
    Ok(Json(ScoreResponse::from(row)))
}

pub async fn delete_score(
    State(state): State<AppState>,
    Path(score_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    state.scores.get_by_id(&score_id).await?;
    state.scores.delete(&score_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn query_scores(
    State(state): State<AppState>,
    Json(filter): Json<ScoreFilter>,
) -> Result<impl IntoResponse, CoreError> {
    let page_size = state.config.page_size(filter.limit);
    let total = state.scores.count(&filter).await?;
    let rows = state.scores.get_by_filter(&filter, page_size).await?;
    let scores: Vec<ScoreResponse> = rows.into_iter().map(ScoreResponse::from).collect();
    Ok(Json(serde_json::json!({ "scores": scores, "total": total })))
}

#[derive(Debug, Deserialize)]
pub struct ScopedParams {
    pub project_id: String,
}

pub async fn get_scores_by_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
    Query(params): Query<ScopedParams>,
) -> Result<impl IntoResponse, CoreError> {
    let rows = state
        .scores
        .get_by_trace_id(&params.project_id, &trace_id)
        .await?;
    let scores: Vec<ScoreResponse> = rows.into_iter().map(ScoreResponse::from).collect();
    Ok(Json(serde_json::json!({ "scores": scores })))
}

pub async fn get_scores_by_span(
    State(state): State<AppState>,
    Path(span_id): Path<String>,
    Query(params): Query<ScopedParams>,
) -> Result<impl IntoResponse, CoreError> {
    let rows = state
        .scores
        .get_by_span_id(&params.project_id, &span_id)
        .await?;
    let scores: Vec<ScoreResponse> = rows.into_iter().map(ScoreResponse::from).collect();
    Ok(Json(serde_json::json!({ "scores": scores })))
}

// ── Analytics ──

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

pub async fn get_statistics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse, CoreError> {
    let window = optional_window(&params.preset, &params.from, &params.to)?;
    let stats = state
        .scores
        .get_statistics(&params.project_id, &params.name, window.as_ref())
        .await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesParams {
    pub project_id: String,
    pub name: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

fn default_interval() -> String {
    "day".to_string()
}

pub async fn get_time_series(
    State(state): State<AppState>,
    Query(params): Query<TimeSeriesParams>,
) -> Result<impl IntoResponse, CoreError> {
    let interval = BucketInterval::parse(&params.interval)?;
    let window = optional_window(&params.preset, &params.from, &params.to)?;
    let buckets = state
        .scores
        .get_time_series(&params.project_id, &params.name, interval, window.as_ref())
        .await?;
    Ok(Json(serde_json::json!({ "buckets": buckets })))
}

#[derive(Debug, Deserialize)]
pub struct DistributionParams {
    pub project_id: String,
    pub name: String,
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

fn default_bins() -> usize {
    10
}

pub async fn get_distribution(
    State(state): State<AppState>,
    Query(params): Query<DistributionParams>,
) -> Result<impl IntoResponse, CoreError> {
    let window = optional_window(&params.preset, &params.from, &params.to)?;
    let bins = state
        .scores
        .get_distribution(&params.project_id, &params.name, params.bins, window.as_ref())
        .await?;
    Ok(Json(serde_json::json!({ "bins": bins })))
}

#[derive(Debug, Deserialize)]
pub struct ComparisonParams {
    pub project_id: String,
    pub name: String,
    pub compare: String,
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

pub async fn get_heatmap(
    State(state): State<AppState>,
    Query(params): Query<ComparisonParams>,
) -> Result<impl IntoResponse, CoreError> {
    let window = optional_window(&params.preset, &params.from, &params.to)?;
    let cells = state
        .scores
        .get_heatmap(
            &params.project_id,
            &params.name,
            &params.compare,
            params.bins,
            window.as_ref(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "cells": cells })))
}

pub async fn get_comparison_metrics(
    State(state): State<AppState>,
    Query(params): Query<ComparisonParams>,
) -> Result<impl IntoResponse, CoreError> {
    let window = optional_window(&params.preset, &params.from, &params.to)?;
    let metrics = state
        .scores
        .get_comparison_metrics(
            &params.project_id,
            &params.name,
            &params.compare,
            window.as_ref(),
        )
        .await?;
    Ok(Json(metrics))
}

pub async fn get_distinct_names(
    State(state): State<AppState>,
    Query(params): Query<ScopedParams>,
) -> Result<impl IntoResponse, CoreError> {
    let names = state.scores.get_distinct_names(&params.project_id).await?;
    Ok(Json(serde_json::json!({ "names": names })))
}

#[derive(Debug, Deserialize)]
pub struct ExperimentSummaryParams {
    pub project_id: String,
    #[serde(default)]
    pub experiment_id: Option<String>,
}

pub async fn get_experiment_summaries(
    State(state): State<AppState>,
    Query(params): Query<ExperimentSummaryParams>,
) -> Result<impl IntoResponse, CoreError> {
    let summaries = state
        .scores
        .experiment_summaries(&params.project_id, params.experiment_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "summaries": summaries })))
}

#[derive(Debug, Deserialize)]
pub struct DailySummaryParams {
    pub project_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn get_daily_summaries(
    State(state): State<AppState>,
    Query(params): Query<DailySummaryParams>,
) -> Result<impl IntoResponse, CoreError> {
    let summaries = state
        .scores
        .daily_summaries(&params.project_id, params.name.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "summaries": summaries })))
}

pub async fn get_source_daily_counts(
    State(state): State<AppState>,
    Query(params): Query<ScopedParams>,
) -> Result<impl IntoResponse, CoreError> {
    let counts = state.scores.source_daily_counts(&params.project_id).await?;
    Ok(Json(serde_json::json!({ "counts": counts })))
}
