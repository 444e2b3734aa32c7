use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

use crate::analytics;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::models::batch::{BatchStatus, TelemetryBatch, TelemetryEventRecord};
use crate::models::preset::{
    CreatePresetRequest, FilterPreset, ListPresetsParams, UpdatePresetRequest,
};
use crate::models::pricing::ModelPricing;
use crate::models::relational::{
    CreateLlmTraceRequest, CreateObservationRequest, CreateQualityScoreRequest, LlmObservation,
    LlmTrace, QualityScore, QualityScoreAggregate, QualityScoreBucket,
};

/// The per-event outcome appended to `telemetry_events` when a batch
/// finalizes.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub id: String,
    pub event_type: String,
    pub event_payload: String,
    pub processed: bool,
    pub error_message: Option<String>,
}

/// Relational metadata store on SQLite. Holds the small-cardinality entities
/// that need UPDATE semantics, unique external ids, and cross-entity joins:
/// batches, per-event outcomes, trace/observation registrations, quality
/// scores, filter presets, and the model-pricing table the resolver reads.
pub struct MetaDb {
    conn: Mutex<Connection>,
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

impl MetaDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS telemetry_batches (
                id                 TEXT PRIMARY KEY,
                project_id         TEXT NOT NULL,
                batch_metadata     TEXT NOT NULL DEFAULT '{}',
                total_events       INTEGER NOT NULL,
                processed_events   INTEGER NOT NULL DEFAULT 0,
                failed_events      INTEGER NOT NULL DEFAULT 0,
                status             TEXT NOT NULL DEFAULT 'queued'
                                   CHECK(status IN ('queued','processing','completed','failed','partial')),
                processing_time_ms INTEGER,
                created_at         TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                completed_at       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_batches_project ON telemetry_batches(project_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS telemetry_events (
                id            TEXT PRIMARY KEY,
                batch_id      TEXT NOT NULL REFERENCES telemetry_batches(id) ON DELETE CASCADE,
                event_type    TEXT NOT NULL,
                event_payload TEXT NOT NULL,
                processed_at  TEXT,
                error_message TEXT,
                retry_count   INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_events_batch ON telemetry_events(batch_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_events_retryable ON telemetry_events(batch_id)
                WHERE error_message IS NOT NULL AND processed_at IS NULL;

            CREATE TABLE IF NOT EXISTS llm_traces (
                id                TEXT PRIMARY KEY,
                project_id        TEXT NOT NULL,
                external_trace_id TEXT NOT NULL,
                name              TEXT NOT NULL,
                user_id           TEXT,
                session_id        TEXT,
                metadata          TEXT NOT NULL DEFAULT '{}',
                created_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE(project_id, external_trace_id)
            );

            CREATE TABLE IF NOT EXISTS llm_observations (
                id                      TEXT PRIMARY KEY,
                trace_id                TEXT NOT NULL REFERENCES llm_traces(id) ON DELETE CASCADE,
                external_observation_id TEXT NOT NULL,
                name                    TEXT NOT NULL,
                observation_type        TEXT NOT NULL DEFAULT 'span',
                model                   TEXT,
                provider                TEXT,
                input                   TEXT,
                output                  TEXT,
                status_code             INTEGER NOT NULL DEFAULT 0 CHECK(status_code IN (0,1,2)),
                status_message          TEXT,
                start_time              TEXT,
                end_time                TEXT,
                usage                   TEXT NOT NULL DEFAULT '{}',
                cost                    TEXT,
                created_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE(trace_id, external_observation_id)
            );

            CREATE TABLE IF NOT EXISTS quality_scores (
                id             TEXT PRIMARY KEY,
                project_id     TEXT NOT NULL,
                trace_id       TEXT,
                observation_id TEXT,
                name           TEXT NOT NULL,
                value          REAL,
                string_value   TEXT,
                data_type      TEXT NOT NULL DEFAULT 'NUMERIC',
                source         TEXT NOT NULL DEFAULT 'EVAL',
                evaluator_name TEXT,
                min_value      REAL,
                max_value      REAL,
                categories     TEXT NOT NULL DEFAULT '[]',
                author         TEXT,
                reason         TEXT,
                created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_quality_scores_project ON quality_scores(project_id, name);

            CREATE TABLE IF NOT EXISTS filter_presets (
                id           TEXT PRIMARY KEY,
                project_id   TEXT NOT NULL,
                table_name   TEXT NOT NULL,
                name         TEXT NOT NULL,
                created_by   TEXT NOT NULL,
                is_public    INTEGER NOT NULL DEFAULT 0,
                filter_state TEXT NOT NULL DEFAULT '{}',
                column_state TEXT NOT NULL DEFAULT '{}',
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE(project_id, name)
            );

            CREATE TABLE IF NOT EXISTS model_pricing (
                id                      TEXT PRIMARY KEY,
                model_name              TEXT NOT NULL,
                match_pattern           TEXT NOT NULL,
                provider                TEXT NOT NULL DEFAULT '',
                project_id              TEXT,
                input_cost_per_million  TEXT NOT NULL,
                output_cost_per_million TEXT NOT NULL,
                start_date              TEXT,
                end_date                TEXT,
                is_deprecated           INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_model_pricing_project ON model_pricing(project_id);
            ",
        )?;
        Ok(())
    }

    /// Cheap liveness probe for the health surface.
    pub fn ping(&self) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ── Batch operations ──

    pub fn create_batch(
        &self,
        id: &str,
        project_id: &str,
        batch_metadata: &str,
        total_events: u32,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO telemetry_batches (id, project_id, batch_metadata, total_events, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'processing', ?5)",
            params![id, project_id, batch_metadata, total_events, now_iso()],
        )?;
        Ok(())
    }

    pub fn get_batch(&self, id: &str) -> CoreResult<Option<TelemetryBatch>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, batch_metadata, total_events, processed_events, failed_events,
                    status, processing_time_ms, created_at, completed_at
             FROM telemetry_batches WHERE id = ?1",
        )?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })
            .optional()?;
        row.map(
            |(id, project_id, metadata, total, processed, failed, status, ms, created, completed)| {
                Ok(TelemetryBatch {
                    id,
                    project_id,
                    batch_metadata: serde_json::from_str(&metadata)
                        .unwrap_or(serde_json::Value::Null),
                    total_events: total,
                    processed_events: processed,
                    failed_events: failed,
                    status: BatchStatus::parse(&status)?,
                    processing_time_ms: ms,
                    created_at: created,
                    completed_at: completed,
                })
            },
        )
        .transpose()
    }

    pub fn list_batches(
        &self,
        project_id: &str,
        status: Option<BatchStatus>,
        limit: u64,
    ) -> CoreResult<Vec<TelemetryBatch>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT id FROM telemetry_batches WHERE project_id = ?1",
        );
        if status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?3");
        let mut stmt = conn.prepare(&sql)?;
        let ids: Vec<String> = match status {
            Some(s) => stmt
                .query_map(params![project_id, s.as_str(), limit as i64], |row| {
                    row.get(0)
                })?
                .collect::<Result<_, _>>()?,
            None => stmt
                .query_map(params![project_id, rusqlite::types::Null, limit as i64], |row| {
                    row.get(0)
                })?
                .collect::<Result<_, _>>()?,
        };
        drop(stmt);
        drop(conn);
        ids.iter()
            .filter_map(|id| self.get_batch(id).transpose())
            .collect()
    }

    /// Terminal transition: stamp the counts, elapsed time, status, and
    /// `completed_at`. Monotonic: a batch already terminal is left alone.
    pub fn finalize_batch(
        &self,
        id: &str,
        processed_events: u32,
        failed_events: u32,
        status: BatchStatus,
        processing_time_ms: i64,
    ) -> CoreResult<bool> {
        if !status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "finalize requires a terminal status, got {}",
                status.as_str()
            )));
        }
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE telemetry_batches
             SET processed_events = ?2, failed_events = ?3, status = ?4,
                 processing_time_ms = ?5, completed_at = ?6
             WHERE id = ?1 AND status IN ('queued','processing')",
            params![
                id,
                processed_events,
                failed_events,
                status.as_str(),
                processing_time_ms,
                now_iso()
            ],
        )?;
        Ok(count > 0)
    }

    // ── Event operations ──

    /// Append per-event outcomes for a batch in one transaction.
    pub fn insert_event_outcomes(
        &self,
        batch_id: &str,
        outcomes: &[EventOutcome],
    ) -> CoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(CoreError::from)?;
        {
            let now = now_iso();
            let mut stmt = tx.prepare(
                "INSERT INTO telemetry_events
                     (id, batch_id, event_type, event_payload, processed_at, error_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for outcome in outcomes {
                let processed_at = outcome.processed.then(|| now.clone());
                stmt.execute(params![
                    outcome.id,
                    batch_id,
                    outcome.event_type,
                    outcome.event_payload,
                    processed_at,
                    outcome.error_message,
                    now,
                ])?;
            }
        }
        tx.commit().map_err(CoreError::from)?;
        Ok(())
    }

    pub fn list_batch_events(&self, batch_id: &str) -> CoreResult<Vec<TelemetryEventRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_id, event_type, event_payload, processed_at, error_message,
                    retry_count, created_at
             FROM telemetry_events WHERE batch_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![batch_id], map_event_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Events eligible for retry: failed, never processed, and under the
    /// retry ceiling.
    pub fn list_retryable_events(
        &self,
        batch_id: &str,
        max_retries: u32,
    ) -> CoreResult<Vec<TelemetryEventRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, batch_id, event_type, event_payload, processed_at, error_message,
                    retry_count, created_at
             FROM telemetry_events
             WHERE batch_id = ?1 AND error_message IS NOT NULL AND processed_at IS NULL
               AND retry_count < ?2
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![batch_id, max_retries], map_event_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Retry succeeded: stamp `processed_at` and clear the error.
    pub fn mark_event_processed(&self, event_id: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE telemetry_events SET processed_at = ?2, error_message = NULL WHERE id = ?1",
            params![event_id, now_iso()],
        )?;
        Ok(count > 0)
    }

    /// Retry failed again: bump the counter and re-stamp the message.
    pub fn mark_event_retry_failed(&self, event_id: &str, error: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE telemetry_events SET retry_count = retry_count + 1, error_message = ?2
             WHERE id = ?1",
            params![event_id, error],
        )?;
        Ok(count > 0)
    }

    // ── LLM trace registrations ──

    pub fn create_llm_trace(&self, req: &CreateLlmTraceRequest) -> CoreResult<LlmTrace> {
        let id = ids::new_id();
        let metadata = req
            .metadata
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "{}".to_string());
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO llm_traces (id, project_id, external_trace_id, name, user_id, session_id, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    req.project_id,
                    req.external_trace_id,
                    req.name,
                    req.user_id,
                    req.session_id,
                    metadata
                ],
            )
            .map_err(|e| match CoreError::from(e) {
                CoreError::Duplicate(_) => CoreError::Duplicate(format!(
                    "external_trace_id {:?} already registered",
                    req.external_trace_id
                )),
                other => other,
            })?;
        }
        self.get_llm_trace(&id)?
            .ok_or(CoreError::NotFound("llm trace"))
    }

    pub fn get_llm_trace(&self, id: &str) -> CoreResult<Option<LlmTrace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, external_trace_id, name, user_id, session_id, metadata,
                    created_at, updated_at
             FROM llm_traces WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![id], map_llm_trace).optional()?)
    }

    pub fn get_llm_trace_by_external(
        &self,
        project_id: &str,
        external_trace_id: &str,
    ) -> CoreResult<Option<LlmTrace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, external_trace_id, name, user_id, session_id, metadata,
                    created_at, updated_at
             FROM llm_traces WHERE project_id = ?1 AND external_trace_id = ?2",
        )?;
        Ok(stmt
            .query_row(params![project_id, external_trace_id], map_llm_trace)
            .optional()?)
    }

    pub fn update_llm_trace(
        &self,
        id: &str,
        name: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        metadata: &serde_json::Value,
    ) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE llm_traces SET name = ?2, user_id = ?3, session_id = ?4, metadata = ?5,
                    updated_at = ?6
             WHERE id = ?1",
            params![id, name, user_id, session_id, metadata.to_string(), now_iso()],
        )?;
        Ok(count > 0)
    }

    // ── LLM observations ──

    pub fn create_observation(&self, req: &CreateObservationRequest) -> CoreResult<LlmObservation> {
        if req.status_code > 2 {
            return Err(CoreError::Validation(format!(
                "status_code must be 0..2, got {}",
                req.status_code
            )));
        }
        let id = ids::new_id();
        let usage = req
            .usage
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "{}".to_string());
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO llm_observations
                     (id, trace_id, external_observation_id, name, observation_type, model,
                      provider, input, output, status_code, status_message, start_time, end_time,
                      usage, cost)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    id,
                    req.trace_id,
                    req.external_observation_id,
                    req.name,
                    req.observation_type.as_deref().unwrap_or("span"),
                    req.model,
                    req.provider,
                    req.input,
                    req.output,
                    req.status_code,
                    req.status_message,
                    req.start_time,
                    req.end_time,
                    usage,
                    req.cost.map(|c| c.to_string()),
                ],
            )
            .map_err(|e| match CoreError::from(e) {
                CoreError::Duplicate(_) => CoreError::Duplicate(format!(
                    "external_observation_id {:?} already registered",
                    req.external_observation_id
                )),
                other => other,
            })?;
        }
        self.get_observation(&id)?
            .ok_or(CoreError::NotFound("observation"))
    }

    pub fn get_observation(&self, id: &str) -> CoreResult<Option<LlmObservation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, external_observation_id, name, observation_type, model,
                    provider, input, output, status_code, status_message, start_time, end_time,
                    usage, cost, created_at, updated_at
             FROM llm_observations WHERE id = ?1",
        )?;
        stmt.query_row(params![id], map_observation)
            .optional()?
            .transpose()
    }

    pub fn list_observations_by_trace(&self, trace_id: &str) -> CoreResult<Vec<LlmObservation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, external_observation_id, name, observation_type, model,
                    provider, input, output, status_code, status_message, start_time, end_time,
                    usage, cost, created_at, updated_at
             FROM llm_observations WHERE trace_id = ?1 ORDER BY start_time, id",
        )?;
        stmt.query_map(params![trace_id], map_observation)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect()
    }

    pub fn update_observation_outcome(
        &self,
        id: &str,
        status_code: u8,
        status_message: Option<&str>,
        output: Option<&str>,
        end_time: Option<&str>,
        cost: Option<rust_decimal::Decimal>,
    ) -> CoreResult<bool> {
        if status_code > 2 {
            return Err(CoreError::Validation(format!(
                "status_code must be 0..2, got {status_code}"
            )));
        }
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE llm_observations
             SET status_code = ?2, status_message = ?3, output = COALESCE(?4, output),
                 end_time = COALESCE(?5, end_time), cost = COALESCE(?6, cost), updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                status_code,
                status_message,
                output,
                end_time,
                cost.map(|c| c.to_string()),
                now_iso()
            ],
        )?;
        Ok(count > 0)
    }

    // ── Quality scores ──

    pub fn create_quality_score(
        &self,
        req: &CreateQualityScoreRequest,
    ) -> CoreResult<QualityScore> {
        if req.value.is_none() && req.string_value.is_none() {
            return Err(CoreError::Validation(
                "quality score requires a value or string_value".to_string(),
            ));
        }
        let id = ids::new_id();
        let categories = req
            .categories
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "[]".to_string());
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO quality_scores
                     (id, project_id, trace_id, observation_id, name, value, string_value,
                      data_type, source, evaluator_name, min_value, max_value, categories,
                      author, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    id,
                    req.project_id,
                    req.trace_id,
                    req.observation_id,
                    req.name,
                    req.value,
                    req.string_value,
                    req.data_type.as_deref().unwrap_or("NUMERIC"),
                    req.source.as_deref().unwrap_or("EVAL"),
                    req.evaluator_name,
                    req.min_value,
                    req.max_value,
                    categories,
                    req.author,
                    req.reason,
                ],
            )?;
        }
        self.get_quality_score(&id)?
            .ok_or(CoreError::NotFound("quality score"))
    }

    pub fn get_quality_score(&self, id: &str) -> CoreResult<Option<QualityScore>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, trace_id, observation_id, name, value, string_value,
                    data_type, source, evaluator_name, min_value, max_value, categories,
                    author, reason, created_at, updated_at
             FROM quality_scores WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![id], map_quality_score).optional()?)
    }

    pub fn list_quality_scores(
        &self,
        project_id: &str,
        trace_id: Option<&str>,
        limit: u64,
    ) -> CoreResult<Vec<QualityScore>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, trace_id, observation_id, name, value, string_value,
                    data_type, source, evaluator_name, min_value, max_value, categories,
                    author, reason, created_at, updated_at
             FROM quality_scores
             WHERE project_id = ?1 AND (?2 IS NULL OR trace_id = ?2)
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![project_id, trace_id, limit as i64], map_quality_score)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_quality_score(&self, id: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM quality_scores WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    /// Per-name aggregates. Rows carrying a categorical value bucket as
    /// categorical even when a numeric value is also present.
    pub fn aggregate_quality_scores(
        &self,
        project_id: &str,
    ) -> CoreResult<Vec<QualityScoreAggregate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name,
                    SUM(CASE WHEN string_value IS NULL AND value IS NOT NULL THEN 1 ELSE 0 END),
                    SUM(CASE WHEN string_value IS NOT NULL THEN 1 ELSE 0 END),
                    AVG(CASE WHEN string_value IS NULL THEN value END),
                    MIN(CASE WHEN string_value IS NULL THEN value END),
                    MAX(CASE WHEN string_value IS NULL THEN value END)
             FROM quality_scores
             WHERE project_id = ?1
             GROUP BY name
             ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(QualityScoreAggregate {
                    name: row.get(0)?,
                    numeric_count: row.get::<_, i64>(1)? as u64,
                    categorical_count: row.get::<_, i64>(2)? as u64,
                    avg: row.get(3)?,
                    min: row.get(4)?,
                    max: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Distribution of one quality-score name: categorical rows bucket by
    /// their string value, numeric rows bin over the observed range.
    pub fn quality_score_distribution(
        &self,
        project_id: &str,
        name: &str,
        bins: usize,
    ) -> CoreResult<Vec<QualityScoreBucket>> {
        let rows: Vec<(Option<f64>, Option<String>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT value, string_value FROM quality_scores
                 WHERE project_id = ?1 AND name = ?2",
            )?;
            stmt.query_map(params![project_id, name], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };

        let mut buckets: Vec<QualityScoreBucket> = Vec::new();
        let mut categorical: std::collections::BTreeMap<String, u64> =
            std::collections::BTreeMap::new();
        let mut numeric: Vec<f64> = Vec::new();
        for (value, string_value) in rows {
            match (string_value, value) {
                (Some(s), _) => *categorical.entry(s).or_insert(0) += 1,
                (None, Some(v)) => numeric.push(v),
                (None, None) => {}
            }
        }
        for (value, count) in categorical {
            buckets.push(QualityScoreBucket {
                bucket: value,
                count,
            });
        }
        if !numeric.is_empty() && bins > 0 {
            let min = numeric.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mut counts = vec![0u64; bins];
            for v in &numeric {
                counts[analytics::bin_index(*v, min, max, bins)] += 1;
            }
            for (i, (lower, upper)) in analytics::bin_edges(min, max, bins).iter().enumerate() {
                buckets.push(QualityScoreBucket {
                    bucket: format!("[{lower:.4}, {upper:.4})"),
                    count: counts[i],
                });
            }
        }
        Ok(buckets)
    }

    // ── Filter presets ──

    pub fn exists_preset_by_name(
        &self,
        project_id: &str,
        name: &str,
        exclude_id: Option<&str>,
    ) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM filter_presets
             WHERE project_id = ?1 AND name = ?2 AND (?3 IS NULL OR id != ?3)",
            params![project_id, name, exclude_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn create_preset(&self, req: &CreatePresetRequest) -> CoreResult<FilterPreset> {
        if self.exists_preset_by_name(&req.project_id, &req.name, None)? {
            return Err(CoreError::Duplicate(format!(
                "filter preset {:?} already exists in project",
                req.name
            )));
        }
        let id = ids::new_id();
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO filter_presets
                     (id, project_id, table_name, name, created_by, is_public, filter_state, column_state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    req.project_id,
                    req.table_name,
                    req.name,
                    req.created_by,
                    req.is_public as i64,
                    req.filter_state.to_string(),
                    req.column_state.to_string(),
                ],
            )?;
        }
        self.get_preset(&id)?.ok_or(CoreError::NotFound("preset"))
    }

    pub fn get_preset(&self, id: &str) -> CoreResult<Option<FilterPreset>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, table_name, name, created_by, is_public, filter_state,
                    column_state, created_at, updated_at
             FROM filter_presets WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![id], map_preset).optional()?)
    }

    /// Visibility: `include_all` unions public presets with the caller's
    /// own; otherwise the caller only sees presets they created.
    pub fn list_presets(&self, params: &ListPresetsParams) -> CoreResult<Vec<FilterPreset>> {
        let conn = self.conn.lock().unwrap();
        let visibility = if params.include_all {
            "(is_public = 1 OR created_by = ?3)"
        } else {
            "created_by = ?3"
        };
        let sql = format!(
            "SELECT id, project_id, table_name, name, created_by, is_public, filter_state,
                    column_state, created_at, updated_at
             FROM filter_presets
             WHERE project_id = ?1 AND (?2 IS NULL OR table_name = ?2) AND {visibility}
             ORDER BY name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![params.project_id, params.table_name, params.requested_by],
                map_preset,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_preset(&self, id: &str, req: &UpdatePresetRequest) -> CoreResult<bool> {
        let existing = self.get_preset(id)?.ok_or(CoreError::NotFound("preset"))?;
        if self.exists_preset_by_name(&existing.project_id, &req.name, Some(id))? {
            return Err(CoreError::Duplicate(format!(
                "filter preset {:?} already exists in project",
                req.name
            )));
        }
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE filter_presets
             SET name = ?2, is_public = ?3, filter_state = ?4, column_state = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                id,
                req.name,
                req.is_public as i64,
                req.filter_state.to_string(),
                req.column_state.to_string(),
                now_iso()
            ],
        )?;
        Ok(count > 0)
    }

    pub fn delete_preset(&self, id: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM filter_presets WHERE id = ?1", params![id])?;
        Ok(count > 0)
    }

    // ── Model pricing ──

    /// Candidate pricing rows for a lookup, ordered for the deterministic
    /// tie-break: project-specific before global, then most recent
    /// `start_date` first. Regex matching happens in the resolver.
    pub fn pricing_candidates(
        &self,
        project_id: &str,
        at: &str,
    ) -> CoreResult<Vec<ModelPricing>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, model_name, match_pattern, provider, project_id,
                    input_cost_per_million, output_cost_per_million, start_date, end_date,
                    is_deprecated
             FROM model_pricing
             WHERE (project_id = ?1 OR project_id IS NULL)
               AND is_deprecated = 0
               AND (start_date IS NULL OR start_date <= ?2)
               AND (end_date IS NULL OR end_date > ?2)
             ORDER BY (project_id IS NULL) ASC, start_date DESC, id ASC",
        )?;
        stmt.query_map(params![project_id, at], map_pricing)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect()
    }

    /// Insert a pricing row. The table is curated outside this core; this
    /// exists for bootstrap and tests.
    pub fn insert_model_pricing(&self, row: &ModelPricing) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO model_pricing
                 (id, model_name, match_pattern, provider, project_id, input_cost_per_million,
                  output_cost_per_million, start_date, end_date, is_deprecated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT DO NOTHING",
            params![
                row.id,
                row.model_name,
                row.match_pattern,
                row.provider,
                row.project_id,
                row.input_cost_per_million.to_string(),
                row.output_cost_per_million.to_string(),
                row.start_date,
                row.end_date,
                row.is_deprecated as i64,
            ],
        )?;
        Ok(())
    }
}

// ── Row mappers ──

fn map_event_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelemetryEventRecord> {
    let payload: String = row.get(3)?;
    Ok(TelemetryEventRecord {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        event_type: row.get(2)?,
        event_payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        processed_at: row.get(4)?,
        error_message: row.get(5)?,
        retry_count: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_llm_trace(row: &rusqlite::Row<'_>) -> rusqlite::Result<LlmTrace> {
    let metadata: String = row.get(6)?;
    Ok(LlmTrace {
        id: row.get(0)?,
        project_id: row.get(1)?,
        external_trace_id: row.get(2)?,
        name: row.get(3)?,
        user_id: row.get(4)?,
        session_id: row.get(5)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_observation(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoreResult<LlmObservation>> {
    let usage: String = row.get(13)?;
    let cost: Option<String> = row.get(14)?;
    let cost = match cost {
        Some(raw) => match raw.parse::<rust_decimal::Decimal>() {
            Ok(d) => Some(d),
            Err(e) => {
                return Ok(Err(CoreError::Corrupt(format!(
                    "observation cost {raw:?}: {e}"
                ))));
            }
        },
        None => None,
    };
    Ok(Ok(LlmObservation {
        id: row.get(0)?,
        trace_id: row.get(1)?,
        external_observation_id: row.get(2)?,
        name: row.get(3)?,
        observation_type: row.get(4)?,
        model: row.get(5)?,
        provider: row.get(6)?,
        input: row.get(7)?,
        output: row.get(8)?,
        status_code: row.get(9)?,
        status_message: row.get(10)?,
        start_time: row.get(11)?,
        end_time: row.get(12)?,
        usage: serde_json::from_str(&usage).unwrap_or(serde_json::Value::Null),
        cost,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    }))
}

fn map_quality_score(row: &rusqlite::Row<'_>) -> rusqlite::Result<QualityScore> {
    let categories: String = row.get(12)?;
    Ok(QualityScore {
        id: row.get(0)?,
        project_id: row.get(1)?,
        trace_id: row.get(2)?,
        observation_id: row.get(3)?,
        name: row.get(4)?,
        value: row.get(5)?,
        string_value: row.get(6)?,
        data_type: row.get(7)?,
        source: row.get(8)?,
        evaluator_name: row.get(9)?,
        min_value: row.get(10)?,
        max_value: row.get(11)?,
        categories: serde_json::from_str(&categories).unwrap_or(serde_json::Value::Null),
        author: row.get(13)?,
        reason: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

fn map_pricing(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoreResult<ModelPricing>> {
    let input_raw: String = row.get(5)?;
    let output_raw: String = row.get(6)?;
    let parse = |raw: &str| {
        raw.parse::<rust_decimal::Decimal>()
            .map_err(|e| CoreError::Corrupt(format!("pricing rate {raw:?}: {e}")))
    };
    let input = match parse(&input_raw) {
        Ok(d) => d,
        Err(e) => return Ok(Err(e)),
    };
    let output = match parse(&output_raw) {
        Ok(d) => d,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok(ModelPricing {
        id: row.get(0)?,
        model_name: row.get(1)?,
        match_pattern: row.get(2)?,
        provider: row.get(3)?,
        project_id: row.get(4)?,
        input_cost_per_million: input,
        output_cost_per_million: output,
        start_date: row.get(7)?,
        end_date: row.get(8)?,
        is_deprecated: row.get::<_, i64>(9)? != 0,
    }))
}

fn map_preset(row: &rusqlite::Row<'_>) -> rusqlite::Result<FilterPreset> {
    let filter_state: String = row.get(6)?;
    let column_state: String = row.get(7)?;
    Ok(FilterPreset {
        id: row.get(0)?,
        project_id: row.get(1)?,
        table_name: row.get(2)?,
        name: row.get(3)?,
        created_by: row.get(4)?,
        is_public: row.get::<_, i64>(5)? != 0,
        filter_state: serde_json::from_str(&filter_state).unwrap_or(serde_json::Value::Null),
        column_state: serde_json::from_str(&column_state).unwrap_or(serde_json::Value::Null),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn db() -> MetaDb {
        MetaDb::open_in_memory().unwrap()
    }

    fn outcome(id: &str, processed: bool, error: Option<&str>) -> EventOutcome {
        EventOutcome {
            id: id.to_string(),
            event_type: "span".to_string(),
            event_payload: "{}".to_string(),
            processed,
            error_message: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_batch_lifecycle() {
        let db = db();
        db.create_batch("b1", "p1", "{}", 3).unwrap();
        let batch = db.get_batch("b1").unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Processing);
        assert_eq!(batch.total_events, 3);
        assert!(batch.completed_at.is_none());

        assert!(db
            .finalize_batch("b1", 2, 1, BatchStatus::Partial, 42)
            .unwrap());
        let batch = db.get_batch("b1").unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(batch.processed_events, 2);
        assert_eq!(batch.failed_events, 1);
        assert!(batch.processed_events + batch.failed_events <= batch.total_events);
        assert!(batch.completed_at.is_some());
        assert_eq!(batch.processing_time_ms, Some(42));
    }

    #[test]
    fn test_finalize_is_monotonic() {
        let db = db();
        db.create_batch("b1", "p1", "{}", 1).unwrap();
        assert!(db
            .finalize_batch("b1", 1, 0, BatchStatus::Completed, 5)
            .unwrap());
        // second terminal transition is a no-op
        assert!(!db
            .finalize_batch("b1", 0, 1, BatchStatus::Failed, 9)
            .unwrap());
        let batch = db.get_batch("b1").unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
    }

    #[test]
    fn test_finalize_rejects_non_terminal() {
        let db = db();
        db.create_batch("b1", "p1", "{}", 1).unwrap();
        assert!(db
            .finalize_batch("b1", 0, 0, BatchStatus::Processing, 0)
            .is_err());
    }

    #[test]
    fn test_list_batches_by_status() {
        let db = db();
        db.create_batch("b1", "p1", "{}", 1).unwrap();
        db.create_batch("b2", "p1", "{}", 1).unwrap();
        db.finalize_batch("b2", 1, 0, BatchStatus::Completed, 1)
            .unwrap();
        let all = db.list_batches("p1", None, 10).unwrap();
        assert_eq!(all.len(), 2);
        let completed = db
            .list_batches("p1", Some(BatchStatus::Completed), 10)
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "b2");
    }

    #[test]
    fn test_event_retry_bookkeeping() {
        let db = db();
        db.create_batch("b1", "p1", "{}", 2).unwrap();
        db.insert_event_outcomes(
            "b1",
            &[
                outcome("e1", true, None),
                outcome("e2", false, Some("writer failed")),
            ],
        )
        .unwrap();

        let retryable = db.list_retryable_events("b1", 3).unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].id, "e2");

        // failed retry bumps the counter and keeps eligibility until the cap
        db.mark_event_retry_failed("e2", "writer failed again")
            .unwrap();
        db.mark_event_retry_failed("e2", "writer failed again")
            .unwrap();
        db.mark_event_retry_failed("e2", "writer failed again")
            .unwrap();
        assert!(db.list_retryable_events("b1", 3).unwrap().is_empty());

        // a successful retry clears the error
        db.mark_event_processed("e2").unwrap();
        let events = db.list_batch_events("b1").unwrap();
        let e2 = events.iter().find(|e| e.id == "e2").unwrap();
        assert!(e2.processed_at.is_some());
        assert!(e2.error_message.is_none());
    }

    #[test]
    fn test_llm_trace_duplicate_external_id() {
        let db = db();
        let req = CreateLlmTraceRequest {
            project_id: "p1".to_string(),
            external_trace_id: "ext-1".to_string(),
            name: "checkout".to_string(),
            user_id: None,
            session_id: None,
            metadata: None,
        };
        db.create_llm_trace(&req).unwrap();
        let err = db.create_llm_trace(&req).unwrap_err();
        assert!(matches!(err, CoreError::Duplicate(_)));
        // same external id in a different project is fine
        let other = CreateLlmTraceRequest {
            project_id: "p2".to_string(),
            ..req
        };
        db.create_llm_trace(&other).unwrap();
    }

    #[test]
    fn test_observation_round_trip() {
        let db = db();
        let trace = db
            .create_llm_trace(&CreateLlmTraceRequest {
                project_id: "p1".to_string(),
                external_trace_id: "ext-1".to_string(),
                name: "checkout".to_string(),
                user_id: None,
                session_id: None,
                metadata: None,
            })
            .unwrap();
        let obs = db
            .create_observation(&CreateObservationRequest {
                trace_id: trace.id.clone(),
                external_observation_id: "obs-1".to_string(),
                name: "completion".to_string(),
                observation_type: None,
                model: Some("gpt-4o".to_string()),
                provider: Some("openai".to_string()),
                input: Some("hi".to_string()),
                output: None,
                status_code: 0,
                status_message: None,
                start_time: None,
                end_time: None,
                usage: None,
                cost: Some(dec!(0.0025)),
            })
            .unwrap();
        assert_eq!(obs.cost, Some(dec!(0.0025)));

        db.update_observation_outcome(&obs.id, 2, Some("timeout"), None, None, None)
            .unwrap();
        let obs = db.get_observation(&obs.id).unwrap().unwrap();
        assert_eq!(obs.status_code, 2);
        // cost untouched by COALESCE
        assert_eq!(obs.cost, Some(dec!(0.0025)));

        assert_eq!(db.list_observations_by_trace(&trace.id).unwrap().len(), 1);
    }

    #[test]
    fn test_quality_score_aggregate_categorical_wins() {
        let db = db();
        let base = CreateQualityScoreRequest {
            project_id: "p1".to_string(),
            trace_id: None,
            observation_id: None,
            name: "tone".to_string(),
            value: None,
            string_value: None,
            data_type: None,
            source: None,
            evaluator_name: None,
            min_value: None,
            max_value: None,
            categories: None,
            author: None,
            reason: None,
        };
        db.create_quality_score(&CreateQualityScoreRequest {
            value: Some(0.5),
            ..base.clone()
        })
        .unwrap();
        db.create_quality_score(&CreateQualityScoreRequest {
            value: Some(0.9),
            string_value: Some("friendly".to_string()),
            ..base.clone()
        })
        .unwrap();

        let aggregates = db.aggregate_quality_scores("p1").unwrap();
        assert_eq!(aggregates.len(), 1);
        // the mixed row buckets as categorical, not numeric
        assert_eq!(aggregates[0].numeric_count, 1);
        assert_eq!(aggregates[0].categorical_count, 1);
        assert_eq!(aggregates[0].avg, Some(0.5));
    }

    #[test]
    fn test_quality_score_distribution() {
        let db = db();
        let base = CreateQualityScoreRequest {
            project_id: "p1".to_string(),
            trace_id: None,
            observation_id: None,
            name: "helpfulness".to_string(),
            value: None,
            string_value: None,
            data_type: None,
            source: None,
            evaluator_name: None,
            min_value: None,
            max_value: None,
            categories: None,
            author: None,
            reason: None,
        };
        for v in [0.1, 0.2, 0.3, 0.9] {
            db.create_quality_score(&CreateQualityScoreRequest {
                value: Some(v),
                ..base.clone()
            })
            .unwrap();
        }
        let buckets = db
            .quality_score_distribution("p1", "helpfulness", 4)
            .unwrap();
        assert_eq!(buckets.len(), 4);
        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 0, 1]);
    }

    #[test]
    fn test_quality_score_requires_some_value() {
        let db = db();
        let req = CreateQualityScoreRequest {
            project_id: "p1".to_string(),
            trace_id: None,
            observation_id: None,
            name: "empty".to_string(),
            value: None,
            string_value: None,
            data_type: None,
            source: None,
            evaluator_name: None,
            min_value: None,
            max_value: None,
            categories: None,
            author: None,
            reason: None,
        };
        assert!(db.create_quality_score(&req).is_err());
    }

    #[test]
    fn test_preset_visibility() {
        let db = db();
        let mk = |name: &str, created_by: &str, is_public: bool| CreatePresetRequest {
            project_id: "p1".to_string(),
            table_name: "traces".to_string(),
            name: name.to_string(),
            created_by: created_by.to_string(),
            is_public,
            filter_state: serde_json::json!({}),
            column_state: serde_json::json!({}),
        };
        db.create_preset(&mk("mine", "alice", false)).unwrap();
        db.create_preset(&mk("shared", "bob", true)).unwrap();
        db.create_preset(&mk("bobs-private", "bob", false)).unwrap();

        let own_only = db
            .list_presets(&ListPresetsParams {
                project_id: "p1".to_string(),
                table_name: Some("traces".to_string()),
                requested_by: "alice".to_string(),
                include_all: false,
            })
            .unwrap();
        assert_eq!(own_only.len(), 1);
        assert_eq!(own_only[0].name, "mine");

        let with_public = db
            .list_presets(&ListPresetsParams {
                project_id: "p1".to_string(),
                table_name: None,
                requested_by: "alice".to_string(),
                include_all: true,
            })
            .unwrap();
        assert_eq!(with_public.len(), 2);
    }

    #[test]
    fn test_preset_unique_name() {
        let db = db();
        let req = CreatePresetRequest {
            project_id: "p1".to_string(),
            table_name: "traces".to_string(),
            name: "errors-only".to_string(),
            created_by: "alice".to_string(),
            is_public: false,
            filter_state: serde_json::json!({}),
            column_state: serde_json::json!({}),
        };
        let preset = db.create_preset(&req).unwrap();
        assert!(matches!(
            db.create_preset(&req),
            Err(CoreError::Duplicate(_))
        ));
        // updating a preset to its own name is allowed (exclude_id)
        assert!(db
            .update_preset(
                &preset.id,
                &UpdatePresetRequest {
                    name: "errors-only".to_string(),
                    is_public: true,
                    filter_state: serde_json::json!({}),
                    column_state: serde_json::json!({}),
                }
            )
            .unwrap());
    }

    #[test]
    fn test_pricing_candidates_order() {
        let db = db();
        let row = |id: &str, project: Option<&str>, start: Option<&str>| ModelPricing {
            id: id.to_string(),
            model_name: "gpt-4o".to_string(),
            match_pattern: "^gpt-4o".to_string(),
            provider: "openai".to_string(),
            project_id: project.map(|p| p.to_string()),
            input_cost_per_million: dec!(1.50),
            output_cost_per_million: dec!(2.00),
            start_date: start.map(|s| s.to_string()),
            end_date: None,
            is_deprecated: false,
        };
        db.insert_model_pricing(&row("global-old", None, Some("2025-01-01")))
            .unwrap();
        db.insert_model_pricing(&row("global-new", None, Some("2026-01-01")))
            .unwrap();
        db.insert_model_pricing(&row("proj", Some("p1"), Some("2025-06-01")))
            .unwrap();

        let candidates = db.pricing_candidates("p1", "2026-03-01").unwrap();
        let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        // project-specific first, then globals newest-first
        assert_eq!(ids, vec!["proj", "global-new", "global-old"]);
    }

    #[test]
    fn test_pricing_temporal_window() {
        let db = db();
        db.insert_model_pricing(&ModelPricing {
            id: "expired".to_string(),
            model_name: "gpt-4o".to_string(),
            match_pattern: "^gpt-4o".to_string(),
            provider: "openai".to_string(),
            project_id: None,
            input_cost_per_million: dec!(1.50),
            output_cost_per_million: dec!(2.00),
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2025-01-01".to_string()),
            is_deprecated: false,
        })
        .unwrap();
        assert!(db.pricing_candidates("p1", "2026-03-01").unwrap().is_empty());
        assert_eq!(db.pricing_candidates("p1", "2024-06-01").unwrap().len(), 1);
    }

    #[test]
    fn test_deprecated_pricing_excluded() {
        let db = db();
        db.insert_model_pricing(&ModelPricing {
            id: "dep".to_string(),
            model_name: "gpt-4o".to_string(),
            match_pattern: "^gpt-4o".to_string(),
            provider: "openai".to_string(),
            project_id: None,
            input_cost_per_million: dec!(1.50),
            output_cost_per_million: dec!(2.00),
            start_date: None,
            end_date: None,
            is_deprecated: true,
        })
        .unwrap();
        assert!(db.pricing_candidates("p1", "2026-03-01").unwrap().is_empty());
    }
}
