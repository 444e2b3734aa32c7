use futures_util::FutureExt;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::blob_store::BlobStore;
use crate::config::IngestConfig;
use crate::dedup::DedupStore;
use crate::error::{CoreError, CoreResult};
use crate::ids;
use crate::meta_db::{EventOutcome, MetaDb};
use crate::models::batch::{BatchStatus, IngestRequest, IngestResponse};
use crate::models::blob::BlobRefIngest;
use crate::models::signal::{
    GenAiEventRow, LogRow, MetricExpHistogramRow, MetricGaugeRow, MetricHistogramRow,
    MetricSumRow, SignalKind, TelemetryEventBody,
};
use crate::models::span::SpanRow;
use crate::pricing::{self, PricingResolver};
use crate::span_store::SpanStore;

/// Bucket the offloaded span payload previews point into. The upload itself
/// happens outside this core; ingest only records the reference.
const OFFLOAD_BUCKET: &str = "payload-offload";

/// Where one event stands inside the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EventState {
    Pending,
    /// Persisted by a signal writer in this batch.
    Written,
    /// Claimed by an earlier batch; counted as already-ingested, not failed.
    Duplicate,
    Failed(String),
}

/// One converted row, tagged by signal kind so writers fan out by variant.
#[derive(Debug, Clone)]
enum ConvertedRow {
    Span(Box<SpanRow>),
    Log(LogRow),
    MetricSum(MetricSumRow),
    MetricGauge(MetricGaugeRow),
    MetricHistogram(MetricHistogramRow),
    MetricExpHistogram(MetricExpHistogramRow),
    GenaiEvent(GenAiEventRow),
}

#[derive(Debug)]
struct PreparedEvent {
    event_id: String,
    kind: SignalKind,
    payload: String,
    dedup_id: Option<String>,
    row: Option<ConvertedRow>,
    state: EventState,
}

/// The ingest pipeline (§4.2): admit → fingerprint → claim → enrich →
/// persist → release-on-failure → finalize. One task per producer request;
/// no application-level locks; concurrency is settled by the atomic claim
/// and the columnar merge.
pub struct IngestPipeline {
    config: IngestConfig,
    dedup: DedupStore,
    pricing: Arc<PricingResolver>,
    meta: Arc<MetaDb>,
    spans: SpanStore,
    blobs: BlobStore,
    ch: clickhouse::Client,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        dedup: DedupStore,
        pricing: Arc<PricingResolver>,
        meta: Arc<MetaDb>,
        spans: SpanStore,
        blobs: BlobStore,
        ch: clickhouse::Client,
    ) -> Self {
        Self {
            config,
            dedup,
            pricing,
            meta,
            spans,
            blobs,
            ch,
        }
    }

    pub async fn process_batch(&self, request: IngestRequest) -> CoreResult<IngestResponse> {
        if request.project_id.is_empty() {
            return Err(CoreError::Validation("project_id is required".to_string()));
        }
        let started = std::time::Instant::now();
        let batch_id = ids::new_id();
        let project_id = request.project_id.clone();
        let total = request.events.len() as u32;
        let metadata = request
            .batch_metadata
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "{}".to_string());

        // Admit: the batch row exists before any event is touched.
        self.meta
            .create_batch(&batch_id, &project_id, &metadata, total)?;

        // Convert and fingerprint. Conversion failures are terminal for the
        // event but never for the batch.
        let event_ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut events: Vec<PreparedEvent> = request
            .events
            .into_iter()
            .map(|body| self.prepare_event(&project_id, body, event_ts))
            .collect();

        // Claim: one pipelined round trip for every span in the batch.
        let dedup_ids: Vec<String> = events
            .iter()
            .filter(|e| e.state == EventState::Pending)
            .filter_map(|e| e.dedup_id.clone())
            .collect();
        if !dedup_ids.is_empty() {
            let ttl = Duration::from_secs(self.config.dedup_ttl_secs);
            match self.dedup.claim_events(&batch_id, &dedup_ids, ttl).await {
                Ok(outcome) => {
                    let duplicates: std::collections::HashSet<&str> =
                        outcome.duplicates.iter().map(String::as_str).collect();
                    for event in events.iter_mut() {
                        if event.state == EventState::Pending {
                            if let Some(dedup_id) = &event.dedup_id {
                                if duplicates.contains(dedup_id.as_str()) {
                                    event.state = EventState::Duplicate;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    // Transport failure before anything was claimed: the
                    // batch fails whole and the error surfaces.
                    let message = format!("dedup claim failed: {e}");
                    for event in events.iter_mut() {
                        if event.state == EventState::Pending {
                            event.state = EventState::Failed(message.clone());
                        }
                    }
                    self.finalize(&batch_id, &events, started).await?;
                    return Err(e);
                }
            }
        }

        // Enrich claimed spans: pricing, cost, oversized-payload offload.
        for event in events.iter_mut() {
            if event.state != EventState::Pending {
                continue;
            }
            if let Some(ConvertedRow::Span(row)) = event.row.as_mut() {
                if let Err(e) = self.enrich_span(&project_id, row).await {
                    if let Some(dedup_id) = &event.dedup_id {
                        self.release_best_effort(std::slice::from_ref(dedup_id)).await;
                    }
                    event.state = EventState::Failed(e.to_string());
                }
            }
        }

        self.persist(&mut events).await;
        let response = self.finalize(&batch_id, &events, started).await?;
        Ok(response)
    }

    fn prepare_event(
        &self,
        project_id: &str,
        body: TelemetryEventBody,
        event_ts: i64,
    ) -> PreparedEvent {
        let kind = body.kind();
        let payload = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
        let mut event = PreparedEvent {
            event_id: ids::new_id(),
            kind,
            payload,
            dedup_id: None,
            row: None,
            state: EventState::Pending,
        };
        let converted: CoreResult<ConvertedRow> = match body {
            TelemetryEventBody::Span(span) => span.into_row(project_id, event_ts).and_then(|row| {
                event.dedup_id = Some(ids::dedup_id(&row.trace_id, &row.span_id)?);
                Ok(ConvertedRow::Span(Box::new(row)))
            }),
            TelemetryEventBody::Log(log) => log.into_row(project_id).map(ConvertedRow::Log),
            TelemetryEventBody::MetricSum(m) => {
                m.into_row(project_id).map(ConvertedRow::MetricSum)
            }
            TelemetryEventBody::MetricGauge(m) => {
                m.into_row(project_id).map(ConvertedRow::MetricGauge)
            }
            TelemetryEventBody::MetricHistogram(m) => {
                m.into_row(project_id).map(ConvertedRow::MetricHistogram)
            }
            TelemetryEventBody::MetricExpHistogram(m) => {
                m.into_row(project_id).map(ConvertedRow::MetricExpHistogram)
            }
            TelemetryEventBody::GenaiEvent(e) => {
                e.into_row(project_id).map(ConvertedRow::GenaiEvent)
            }
        };
        match converted {
            Ok(row) => event.row = Some(row),
            Err(e) => event.state = EventState::Failed(e.to_string()),
        }
        event
    }

    /// Stamp cost and pricing snapshot onto a span and offload oversized
    /// payloads. A missing pricing row means the span continues without
    /// cost; any other pricing error fails the event.
    async fn enrich_span(&self, project_id: &str, row: &mut SpanRow) -> CoreResult<()> {
        if !row.model_name.is_empty() {
            match self.pricing.find_by_model_name(&row.model_name, project_id) {
                Ok(pricing_row) => {
                    let usage: HashMap<&str, u64> = row
                        .usage_details
                        .iter()
                        .map(|(k, v)| (k.as_str(), *v))
                        .collect();
                    let input_tokens = usage.get("input").copied().unwrap_or(0);
                    let output_tokens = usage.get("output").copied().unwrap_or(0);
                    let breakdown =
                        pricing::compute_cost(&pricing_row, input_tokens, output_tokens);
                    row.cost_details = vec![
                        ("input".to_string(), ids::money_to_raw(breakdown.input_cost)?),
                        (
                            "output".to_string(),
                            ids::money_to_raw(breakdown.output_cost)?,
                        ),
                        ("total".to_string(), ids::money_to_raw(breakdown.total_cost)?),
                    ];
                    row.pricing_snapshot = vec![
                        (
                            "input_cost_per_million".to_string(),
                            ids::money_to_raw(breakdown.input_cost_per_million)?,
                        ),
                        (
                            "output_cost_per_million".to_string(),
                            ids::money_to_raw(breakdown.output_cost_per_million)?,
                        ),
                    ];
                    row.total_cost = Some(ids::money_to_raw(breakdown.total_cost)?);
                }
                Err(CoreError::NotFound(_)) => {
                    tracing::debug!(
                        "no pricing for model {:?}, span {} continues without cost",
                        row.model_name,
                        row.span_id
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if row.input.len() > self.config.max_payload_bytes {
            let blob = self
                .offload_payload(project_id, &row.span_id, "input", &row.input)
                .await?;
            row.input = truncate_preview(&row.input, self.config.payload_preview_bytes);
            row.input_blob_id = blob;
        }
        if row.output.len() > self.config.max_payload_bytes {
            let blob = self
                .offload_payload(project_id, &row.span_id, "output", &row.output)
                .await?;
            row.output = truncate_preview(&row.output, self.config.payload_preview_bytes);
            row.output_blob_id = blob;
        }
        Ok(())
    }

    async fn offload_payload(
        &self,
        project_id: &str,
        span_id: &str,
        field: &str,
        payload: &str,
    ) -> CoreResult<String> {
        let blob = self
            .blobs
            .record(&BlobRefIngest {
                project_id: project_id.to_string(),
                entity_type: "span".to_string(),
                entity_id: span_id.to_string(),
                bucket_name: OFFLOAD_BUCKET.to_string(),
                bucket_path: format!("projects/{project_id}/spans/{span_id}/{field}"),
                file_size_bytes: payload.len() as u64,
                content_type: Some("application/json".to_string()),
                compression: Some("gzip".to_string()),
            })
            .await?;
        Ok(blob.event_id)
    }

    /// Fan out to the per-signal writers, one prepared batch per kind, all
    /// kinds in flight concurrently. A failed writer fails exactly the
    /// events of its kind and releases their claims; the other writers'
    /// outcomes are preserved.
    async fn persist(&self, events: &mut [PreparedEvent]) {
        let mut by_kind: HashMap<SignalKind, Vec<usize>> = HashMap::new();
        for (i, event) in events.iter().enumerate() {
            if event.state == EventState::Pending && event.row.is_some() {
                by_kind.entry(event.kind).or_default().push(i);
            }
        }

        let mut futures = Vec::new();
        for (&kind, indices) in &by_kind {
            let rows: Vec<ConvertedRow> = indices
                .iter()
                .filter_map(|&i| events[i].row.clone())
                .collect();
            futures.push(
                async move { (kind, self.write_kind(kind, rows).await) }.boxed(),
            );
        }
        let results: HashMap<SignalKind, CoreResult<()>> =
            join_all(futures).await.into_iter().collect();

        for (kind, indices) in by_kind {
            match results.get(&kind) {
                Some(Ok(())) => {
                    for i in indices {
                        events[i].state = EventState::Written;
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("{} writer failed: {e}", kind.as_str());
                    let message = format!("{} writer failed: {e}", kind.as_str());
                    let mut to_release = Vec::new();
                    for i in indices {
                        if let Some(dedup_id) = &events[i].dedup_id {
                            to_release.push(dedup_id.clone());
                        }
                        events[i].state = EventState::Failed(message.clone());
                    }
                    self.release_best_effort(&to_release).await;
                }
                None => {}
            }
        }
    }

    async fn write_kind(&self, kind: SignalKind, rows: Vec<ConvertedRow>) -> CoreResult<()> {
        match kind {
            SignalKind::Span => {
                let rows: Vec<SpanRow> = rows
                    .into_iter()
                    .filter_map(|r| match r {
                        ConvertedRow::Span(row) => Some(*row),
                        _ => None,
                    })
                    .collect();
                self.spans.insert_batch(&rows).await
            }
            SignalKind::Log => {
                self.write_rows::<LogRow>(
                    "otel_logs",
                    rows.into_iter()
                        .filter_map(|r| match r {
                            ConvertedRow::Log(row) => Some(row),
                            _ => None,
                        })
                        .collect(),
                )
                .await
            }
            SignalKind::MetricSum => {
                self.write_rows::<MetricSumRow>(
                    "otel_metrics_sum",
                    rows.into_iter()
                        .filter_map(|r| match r {
                            ConvertedRow::MetricSum(row) => Some(row),
                            _ => None,
                        })
                        .collect(),
                )
                .await
            }
            SignalKind::MetricGauge => {
                self.write_rows::<MetricGaugeRow>(
                    "otel_metrics_gauge",
                    rows.into_iter()
                        .filter_map(|r| match r {
                            ConvertedRow::MetricGauge(row) => Some(row),
                            _ => None,
                        })
                        .collect(),
                )
                .await
            }
            SignalKind::MetricHistogram => {
                self.write_rows::<MetricHistogramRow>(
                    "otel_metrics_histogram",
                    rows.into_iter()
                        .filter_map(|r| match r {
                            ConvertedRow::MetricHistogram(row) => Some(row),
                            _ => None,
                        })
                        .collect(),
                )
                .await
            }
            SignalKind::MetricExpHistogram => {
                self.write_rows::<MetricExpHistogramRow>(
                    "otel_metrics_exponential_histogram",
                    rows.into_iter()
                        .filter_map(|r| match r {
                            ConvertedRow::MetricExpHistogram(row) => Some(row),
                            _ => None,
                        })
                        .collect(),
                )
                .await
            }
            SignalKind::GenaiEvent => {
                self.write_rows::<GenAiEventRow>(
                    "otel_genai_events",
                    rows.into_iter()
                        .filter_map(|r| match r {
                            ConvertedRow::GenaiEvent(row) => Some(row),
                            _ => None,
                        })
                        .collect(),
                )
                .await
            }
        }
    }

    /// One prepared batch: open the insert, append every row, send.
    async fn write_rows<T>(&self, table: &str, rows: Vec<T>) -> CoreResult<()>
    where
        T: clickhouse::Row + serde::Serialize,
    {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self.ch.insert::<T>(table)?;
        for row in &rows {
            insert.write(row).await?;
        }
        insert.end().await?;
        Ok(())
    }

    /// Release is best-effort; a failure here is logged and never masks the
    /// original error. Keys left claimed expire at TTL.
    async fn release_best_effort(&self, dedup_ids: &[String]) {
        if dedup_ids.is_empty() {
            return;
        }
        if let Err(e) = self.dedup.release_events(dedup_ids).await {
            tracing::warn!("failed to release {} dedup claims: {e}", dedup_ids.len());
        }
    }

    async fn finalize(
        &self,
        batch_id: &str,
        events: &[PreparedEvent],
        started: std::time::Instant,
    ) -> CoreResult<IngestResponse> {
        let total = events.len() as u32;
        let mut processed = 0u32;
        let mut duplicates = 0u32;
        let mut failed = 0u32;
        let outcomes: Vec<EventOutcome> = events
            .iter()
            .map(|event| {
                let (is_processed, error) = match &event.state {
                    EventState::Written => (true, None),
                    EventState::Duplicate => (true, None),
                    EventState::Failed(message) => (false, Some(message.clone())),
                    // a Pending event at finalize means its writer never ran
                    EventState::Pending => {
                        (false, Some("event was not persisted".to_string()))
                    }
                };
                match &event.state {
                    EventState::Duplicate => {
                        processed += 1;
                        duplicates += 1;
                    }
                    EventState::Written => processed += 1,
                    _ => failed += 1,
                }
                EventOutcome {
                    id: event.event_id.clone(),
                    event_type: event.kind.as_str().to_string(),
                    event_payload: event.payload.clone(),
                    processed: is_processed,
                    error_message: error,
                }
            })
            .collect();

        let status = BatchStatus::from_counts(total, processed, failed);
        let elapsed_ms = started.elapsed().as_millis() as i64;
        self.meta
            .finalize_batch(batch_id, processed, failed, status, elapsed_ms)?;
        self.meta.insert_event_outcomes(batch_id, &outcomes)?;

        tracing::info!(
            "batch {batch_id} finalized: {status:?} ({processed}/{total} processed, \
             {duplicates} duplicates, {failed} failed, {elapsed_ms}ms)"
        );
        Ok(IngestResponse {
            batch_id: batch_id.to_string(),
            status,
            total_events: total,
            processed_events: processed,
            failed_events: failed,
            duplicate_events: duplicates,
            processing_time_ms: elapsed_ms,
        })
    }

    /// Re-run the eligible failed events of a batch. Successes stamp
    /// `processed_at` and clear the error; failures bump the retry counter.
    pub async fn retry_batch(&self, batch_id: &str) -> CoreResult<RetryReport> {
        let batch = self
            .meta
            .get_batch(batch_id)?
            .ok_or(CoreError::NotFound("batch"))?;
        let eligible = self
            .meta
            .list_retryable_events(batch_id, self.config.max_event_retries)?;

        let mut report = RetryReport::default();
        for event in eligible {
            report.attempted += 1;
            let body: TelemetryEventBody =
                match serde_json::from_value(event.event_payload.clone()) {
                    Ok(body) => body,
                    Err(e) => {
                        self.meta
                            .mark_event_retry_failed(&event.id, &format!("corrupt payload: {e}"))?;
                        report.failed += 1;
                        continue;
                    }
                };
            match self.retry_event(&batch.project_id, batch_id, body).await {
                Ok(()) => {
                    self.meta.mark_event_processed(&event.id)?;
                    report.succeeded += 1;
                }
                Err(e) => {
                    self.meta.mark_event_retry_failed(&event.id, &e.to_string())?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn retry_event(
        &self,
        project_id: &str,
        batch_id: &str,
        body: TelemetryEventBody,
    ) -> CoreResult<()> {
        let event_ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut event = self.prepare_event(project_id, body, event_ts);
        if let EventState::Failed(message) = &event.state {
            return Err(CoreError::Validation(message.clone()));
        }

        // Re-claim: the original claim was released when the write failed.
        // An id claimed meanwhile means another producer delivered the span;
        // the retry is then already-ingested.
        if let Some(dedup_id) = event.dedup_id.clone() {
            let ttl = Duration::from_secs(self.config.dedup_ttl_secs);
            let outcome = self
                .dedup
                .claim_events(batch_id, std::slice::from_ref(&dedup_id), ttl)
                .await?;
            if !outcome.duplicates.is_empty() {
                return Ok(());
            }
        }

        if let Some(ConvertedRow::Span(row)) = event.row.as_mut() {
            if let Err(e) = self.enrich_span(project_id, row).await {
                if let Some(dedup_id) = &event.dedup_id {
                    self.release_best_effort(std::slice::from_ref(dedup_id)).await;
                }
                return Err(e);
            }
        }

        let kind = event.kind;
        let row = event.row.take().ok_or_else(|| {
            CoreError::Corrupt("retryable event lost its converted row".to_string())
        })?;
        match self.write_kind(kind, vec![row]).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(dedup_id) = &event.dedup_id {
                    self.release_best_effort(std::slice::from_ref(dedup_id)).await;
                }
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetryReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

fn truncate_preview(payload: &str, preview_bytes: usize) -> String {
    if payload.len() <= preview_bytes {
        return payload.to_string();
    }
    let mut cut = preview_bytes;
    while cut > 0 && !payload.is_char_boundary(cut) {
        cut -= 1;
    }
    payload[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_preview_respects_char_boundary() {
        let payload = "héllo wörld".repeat(10);
        let preview = truncate_preview(&payload, 7);
        assert!(preview.len() <= 7);
        assert!(payload.starts_with(&preview));
    }

    #[test]
    fn test_truncate_preview_short_payload_untouched() {
        assert_eq!(truncate_preview("short", 100), "short");
    }
}
