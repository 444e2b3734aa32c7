use clickhouse::Client;

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::blob::{BlobRefIngest, BlobRefRow};
use crate::query_builder;

const BLOB_COLUMNS: &str = "project_id, entity_type, entity_id, event_id, bucket_name, \
     bucket_path, file_size_bytes, content_type, compression, version, is_deleted, created_at";

/// Registry of large payloads offloaded to the object store. Rows are
/// append-only; soft delete appends a higher version with `is_deleted = 1`
/// and reads take the max version per key.
#[derive(Clone)]
pub struct BlobStore {
    ch: Client,
}

impl BlobStore {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }

    /// Register a blob reference, returning the generated event id.
    pub async fn record(&self, req: &BlobRefIngest) -> CoreResult<BlobRefRow> {
        if req.project_id.is_empty() || req.entity_type.is_empty() || req.entity_id.is_empty() {
            return Err(CoreError::Validation(
                "blob reference requires project_id, entity_type, entity_id".to_string(),
            ));
        }
        let row = BlobRefRow {
            project_id: req.project_id.clone(),
            entity_type: req.entity_type.clone(),
            entity_id: req.entity_id.clone(),
            event_id: ids::new_id(),
            bucket_name: req.bucket_name.clone(),
            bucket_path: req.bucket_path.clone(),
            file_size_bytes: req.file_size_bytes,
            content_type: req
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            compression: req.compression.clone().unwrap_or_else(|| "none".to_string()),
            version: 1,
            is_deleted: 0,
            created_at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        };
        self.insert(&row).await?;
        Ok(row)
    }

    pub async fn insert(&self, row: &BlobRefRow) -> CoreResult<()> {
        let mut insert = self.ch.insert::<BlobRefRow>("blob_storage_file_log")?;
        insert.write(row).await?;
        insert.end().await?;
        Ok(())
    }

    /// Latest version of a blob reference; a deletion tombstone reads as
    /// not-found.
    pub async fn get(
        &self,
        project_id: &str,
        entity_type: &str,
        entity_id: &str,
        event_id: &str,
    ) -> CoreResult<BlobRefRow> {
        let sql = format!(
            "SELECT {BLOB_COLUMNS} FROM blob_storage_file_log \
             WHERE project_id = ? AND entity_type = ? AND entity_id = ? AND event_id = ? \
             ORDER BY version DESC LIMIT 1"
        );
        let row = self
            .ch
            .query(&sql)
            .bind(project_id)
            .bind(entity_type)
            .bind(entity_id)
            .bind(event_id)
            .fetch_optional::<BlobRefRow>()
            .await?;
        match row {
            Some(row) if row.is_deleted == 0 => Ok(row),
            _ => Err(CoreError::NotFound("blob reference")),
        }
    }

    /// Live blob references of an entity, one row per event id.
    pub async fn list_by_entity(
        &self,
        project_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> CoreResult<Vec<BlobRefRow>> {
        let sql = format!(
            "SELECT {BLOB_COLUMNS} FROM \
               (SELECT * FROM blob_storage_file_log \
                WHERE project_id = ? AND entity_type = ? AND entity_id = ? \
                ORDER BY version DESC LIMIT 1 BY event_id) \
             WHERE is_deleted = 0 \
             ORDER BY created_at ASC"
        );
        Ok(self
            .ch
            .query(&sql)
            .bind(project_id)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all::<BlobRefRow>()
            .await?)
    }

    /// Soft delete: append a tombstone one version above the current row.
    pub async fn soft_delete(
        &self,
        project_id: &str,
        entity_type: &str,
        entity_id: &str,
        event_id: &str,
    ) -> CoreResult<()> {
        let mut row = self.get(project_id, entity_type, entity_id, event_id).await?;
        row.version += 1;
        row.is_deleted = 1;
        self.insert(&row).await?;
        tracing::debug!(
            "blob reference {}/{} tombstoned at version {}",
            query_builder::escape(entity_id),
            query_builder::escape(event_id),
            row.version
        );
        Ok(())
    }
}
