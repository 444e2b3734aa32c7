use clickhouse::Client;

use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::query::CountRow;
use crate::models::span::{SpanFilter, SpanRow};
use crate::query_builder::{self, SortEntity};

/// Column list in `SpanRow` field order. Every SELECT uses this so RowBinary
/// decoding stays aligned with the struct.
const SPAN_COLUMNS: &str = "trace_id, span_id, parent_span_id, trace_state, project_id, \
     span_name, span_kind, start_time, end_time, completion_start_time, duration_nano, \
     status_code, status_message, has_error, input, output, input_blob_id, output_blob_id, \
     resource_attributes, span_attributes, scope_name, scope_version, scope_attributes, \
     resource_schema_url, scope_schema_url, usage_details, cost_details, pricing_snapshot, \
     total_cost, service_name, model_name, provider_name, span_type, level, version, \
     user_id, session_id, environment, events_timestamp, events_name, events_attributes, \
     links_trace_id, links_span_id, links_trace_state, links_attributes, event_ts, deleted_at";

/// Append-only columnar span store (§4.4). Create and Update are the same
/// operation; the merge engine collapses rows by span id with
/// last-write-wins on `event_ts`, and reads always pick the latest row
/// themselves because merges are eventual. Delete is an asynchronous
/// logical mutation on `deleted_at`.
#[derive(Clone)]
pub struct SpanStore {
    ch: Client,
}

impl SpanStore {
    pub fn new(ch: Client) -> Self {
        Self { ch }
    }

    /// Append rows in one prepared batch: open, write all, send.
    pub async fn insert_batch(&self, rows: &[SpanRow]) -> CoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self.ch.insert::<SpanRow>("otel_traces")?;
        for row in rows {
            row.check_array_lengths()?;
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }

    /// Append one row. "Update" at the storage layer is this same append;
    /// callers must not assume in-place mutation.
    pub async fn append(&self, row: &SpanRow) -> CoreResult<()> {
        self.insert_batch(std::slice::from_ref(row)).await
    }

    /// Latest non-deleted row for a span id.
    pub async fn get_by_id(&self, span_id: &str) -> CoreResult<SpanRow> {
        ids::validate_span_id(span_id)?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM otel_traces \
             WHERE span_id = ? AND deleted_at IS NULL \
             ORDER BY event_ts DESC LIMIT 1"
        );
        let row = self
            .ch
            .query(&sql)
            .bind(span_id.to_ascii_lowercase())
            .fetch_optional::<SpanRow>()
            .await?;
        row.ok_or(CoreError::NotFound("span"))
    }

    /// All non-deleted spans of a trace, latest row per span id, ordered by
    /// start time.
    pub async fn get_by_trace_id(&self, trace_id: &str) -> CoreResult<Vec<SpanRow>> {
        ids::validate_trace_id(trace_id)?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM \
               (SELECT * FROM otel_traces \
                WHERE trace_id = ? AND deleted_at IS NULL \
                ORDER BY event_ts DESC LIMIT 1 BY span_id) \
             ORDER BY start_time ASC"
        );
        Ok(self
            .ch
            .query(&sql)
            .bind(trace_id.to_ascii_lowercase())
            .fetch_all::<SpanRow>()
            .await?)
    }

    /// The most recent root span (`parent_span_id` empty) of a trace.
    pub async fn get_root_span(&self, trace_id: &str) -> CoreResult<SpanRow> {
        ids::validate_trace_id(trace_id)?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM otel_traces \
             WHERE trace_id = ? AND parent_span_id = '' AND deleted_at IS NULL \
             ORDER BY event_ts DESC LIMIT 1"
        );
        let row = self
            .ch
            .query(&sql)
            .bind(trace_id.to_ascii_lowercase())
            .fetch_optional::<SpanRow>()
            .await?;
        row.ok_or(CoreError::NotFound("root span"))
    }

    /// Direct children of a span, ordered by start time.
    pub async fn get_children(&self, parent_span_id: &str) -> CoreResult<Vec<SpanRow>> {
        ids::validate_span_id(parent_span_id)?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM \
               (SELECT * FROM otel_traces \
                WHERE parent_span_id = ? AND deleted_at IS NULL \
                ORDER BY event_ts DESC LIMIT 1 BY span_id) \
             ORDER BY start_time ASC"
        );
        Ok(self
            .ch
            .query(&sql)
            .bind(parent_span_id.to_ascii_lowercase())
            .fetch_all::<SpanRow>()
            .await?)
    }

    pub async fn get_by_filter(&self, filter: &SpanFilter, page_size: u64) -> CoreResult<Vec<SpanRow>> {
        let conditions = query_builder::span_conditions(filter)?;
        let order = query_builder::order_by(
            SortEntity::Span,
            filter.sort_by.as_deref(),
            filter.sort_dir.as_deref(),
        )?;
        let sql = format!(
            "SELECT {SPAN_COLUMNS} FROM \
               (SELECT * FROM otel_traces WHERE {} \
                ORDER BY event_ts DESC LIMIT 1 BY span_id) \
             {order} LIMIT {page_size} OFFSET {}",
            conditions.join(" AND "),
            filter.offset,
        );
        Ok(self.ch.query(&sql).fetch_all::<SpanRow>().await?)
    }

    pub async fn count(&self, filter: &SpanFilter) -> CoreResult<u64> {
        let conditions = query_builder::span_conditions(filter)?;
        let sql = format!(
            "SELECT count() AS count FROM \
               (SELECT span_id FROM otel_traces WHERE {} \
                ORDER BY event_ts DESC LIMIT 1 BY span_id)",
            conditions.join(" AND "),
        );
        let row = self.ch.query(&sql).fetch_one::<CountRow>().await?;
        Ok(row.count)
    }

    /// Asynchronous logical delete: stamps `deleted_at` on every version of
    /// the span. Reads filter on the marker immediately; the mutation
    /// itself completes in the background.
    pub async fn soft_delete(&self, span_id: &str) -> CoreResult<()> {
        ids::validate_span_id(span_id)?;
        let sql = format!(
            "ALTER TABLE otel_traces UPDATE deleted_at = now64(9) \
             WHERE span_id = {} AND deleted_at IS NULL",
            query_builder::quote(&span_id.to_ascii_lowercase()),
        );
        self.ch.query(&sql).execute().await?;
        Ok(())
    }
}
