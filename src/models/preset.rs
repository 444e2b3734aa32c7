use serde::{Deserialize, Serialize};

/// A saved filter preset for one query surface (relational, mutable).
#[derive(Debug, Clone, Serialize)]
pub struct FilterPreset {
    pub id: String,
    pub project_id: String,
    pub table_name: String,
    pub name: String,
    pub created_by: String,
    pub is_public: bool,
    pub filter_state: serde_json::Value,
    pub column_state: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePresetRequest {
    pub project_id: String,
    pub table_name: String,
    pub name: String,
    pub created_by: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub filter_state: serde_json::Value,
    #[serde(default)]
    pub column_state: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePresetRequest {
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub filter_state: serde_json::Value,
    #[serde(default)]
    pub column_state: serde_json::Value,
}

/// Listing scope: `project_id` is always required, `table_name` narrows to a
/// surface, and visibility unions public presets with the caller's own when
/// `include_all` is set (owner-only otherwise).
#[derive(Debug, Clone, Deserialize)]
pub struct ListPresetsParams {
    pub project_id: String,
    #[serde(default)]
    pub table_name: Option<String>,
    pub requested_by: String,
    #[serde(default)]
    pub include_all: bool,
}
