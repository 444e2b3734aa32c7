use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::error::CoreError;
use crate::models::preset::{CreatePresetRequest, ListPresetsParams, UpdatePresetRequest};

pub async fn list_presets(
    State(state): State<AppState>,
    Query(params): Query<ListPresetsParams>,
) -> Result<impl IntoResponse, CoreError> {
    let presets = state.meta.list_presets(&params)?;
    Ok(Json(serde_json::json!({ "presets": presets })))
}

pub async fn create_preset(
    State(state): State<AppState>,
    Json(request): Json<CreatePresetRequest>,
) -> Result<impl IntoResponse, CoreError> {
    if request.name.is_empty() {
        return Err(CoreError::Validation("preset name is required".to_string()));
    }
    let preset = state.meta.create_preset(&request)?;
    Ok((StatusCode::CREATED, Json(preset)))
}

pub async fn get_preset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let preset = state.meta.get_preset(&id)?.ok_or(CoreError::NotFound("preset"))?;
    Ok(Json(preset))
}

pub async fn update_preset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePresetRequest>,
) -> Result<impl IntoResponse, CoreError> {
    if !state.meta.update_preset(&id, &request)? {
        return Err(CoreError::NotFound("preset"));
    }
    let preset = state.meta.get_preset(&id)?.ok_or(CoreError::NotFound("preset"))?;
    Ok(Json(preset))
}

pub async fn delete_preset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    if !state.meta.delete_preset(&id)? {
        return Err(CoreError::NotFound("preset"));
    }
    Ok(StatusCode::NO_CONTENT)
}
