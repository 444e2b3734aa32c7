use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// A blob reference row in `blob_storage_file_log`: the record of a large
/// payload offloaded to the object store. Upload itself happens outside this
/// core; only the reference is persisted. Soft delete bumps `version` and
/// sets `is_deleted`.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct BlobRefRow {
    pub project_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub event_id: String,
    pub bucket_name: String,
    pub bucket_path: String,
    pub file_size_bytes: u64,
    pub content_type: String,
    pub compression: String,
    pub version: u32,
    pub is_deleted: u8,
    pub created_at: i64,
}

/// Request to register a blob reference.
#[derive(Debug, Clone, Deserialize)]
pub struct BlobRefIngest {
    pub project_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub bucket_name: String,
    pub bucket_path: String,
    pub file_size_bytes: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub compression: Option<String>,
}
