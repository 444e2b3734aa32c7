use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::CoreError;
use crate::models::relational::{CreateLlmTraceRequest, CreateObservationRequest};

pub async fn register_trace(
    State(state): State<AppState>,
    Json(request): Json<CreateLlmTraceRequest>,
) -> Result<impl IntoResponse, CoreError> {
    if request.external_trace_id.is_empty() {
        return Err(CoreError::Validation(
            "external_trace_id is required".to_string(),
        ));
    }
    let trace = state.meta.create_llm_trace(&request)?;
    Ok((StatusCode::CREATED, Json(trace)))
}

#[derive(Debug, Deserialize)]
pub struct ExternalTraceParams {
    pub project_id: String,
    pub external_trace_id: String,
}

pub async fn get_trace_by_external(
    State(state): State<AppState>,
    Query(params): Query<ExternalTraceParams>,
) -> Result<impl IntoResponse, CoreError> {
    let trace = state
        .meta
        .get_llm_trace_by_external(&params.project_id, &params.external_trace_id)?
        .ok_or(CoreError::NotFound("llm trace"))?;
    Ok(Json(trace))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTraceRequest {
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub async fn update_trace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTraceRequest>,
) -> Result<impl IntoResponse, CoreError> {
    if !state.meta.update_llm_trace(
        &id,
        &request.name,
        request.user_id.as_deref(),
        request.session_id.as_deref(),
        &request.metadata,
    )? {
        return Err(CoreError::NotFound("llm trace"));
    }
    let trace = state.meta.get_llm_trace(&id)?.ok_or(CoreError::NotFound("llm trace"))?;
    Ok(Json(trace))
}

pub async fn register_observation(
    State(state): State<AppState>,
    Json(request): Json<CreateObservationRequest>,
) -> Result<impl IntoResponse, CoreError> {
    if request.external_observation_id.is_empty() {
        return Err(CoreError::Validation(
            "external_observation_id is required".to_string(),
        ));
    }
    state
        .meta
        .get_llm_trace(&request.trace_id)?
        .ok_or(CoreError::NotFound("llm trace"))?;
    let observation = state.meta.create_observation(&request)?;
    Ok((StatusCode::CREATED, Json(observation)))
}

pub async fn get_observation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let observation = state
        .meta
        .get_observation(&id)?
        .ok_or(CoreError::NotFound("observation"))?;
    Ok(Json(observation))
}

pub async fn list_trace_observations(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    state
        .meta
        .get_llm_trace(&trace_id)?
        .ok_or(CoreError::NotFound("llm trace"))?;
    let observations = state.meta.list_observations_by_trace(&trace_id)?;
    Ok(Json(serde_json::json!({ "observations": observations })))
}

#[derive(Debug, Deserialize)]
pub struct ObservationOutcomeRequest {
    pub status_code: u8,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub cost: Option<rust_decimal::Decimal>,
}

pub async fn update_observation_outcome(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ObservationOutcomeRequest>,
) -> Result<impl IntoResponse, CoreError> {
    if !state.meta.update_observation_outcome(
        &id,
        request.status_code,
        request.status_message.as_deref(),
        request.output.as_deref(),
        request.end_time.as_deref(),
        request.cost,
    )? {
        return Err(CoreError::NotFound("observation"));
    }
    let observation = state
        .meta
        .get_observation(&id)?
        .ok_or(CoreError::NotFound("observation"))?;
    Ok(Json(observation))
}
