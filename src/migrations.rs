use clickhouse::Client;

/// Ordered list of DDL statements to ensure the analytic schema exists.
/// Every statement is idempotent (`IF NOT EXISTS`) so safe to run on every
/// startup.
const MIGRATIONS: &[&str] = &[
    // ── Database ──
    "CREATE DATABASE IF NOT EXISTS loomtrace",

    // ── Spans ──
    // Append-only; "update" re-appends and the merge engine collapses by
    // (project_id, trace_id, span_id) keeping the latest event_ts. Reads
    // still take latest-by-event_ts themselves because merges are eventual.
    // service_name..environment are materialized from the attribute maps at
    // ingest so filter predicates never expand a map at query time.
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_traces
(
    trace_id             String CODEC(ZSTD(1)),
    span_id              String CODEC(ZSTD(1)),
    parent_span_id       String CODEC(ZSTD(1)),
    trace_state          String CODEC(ZSTD(1)),
    project_id           LowCardinality(String) CODEC(ZSTD(1)),
    span_name            LowCardinality(String) CODEC(ZSTD(1)),
    span_kind            UInt8,
    start_time           DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    end_time             Nullable(DateTime64(9, 'UTC')) CODEC(Delta(8), ZSTD(1)),
    completion_start_time Nullable(DateTime64(9, 'UTC')) CODEC(Delta(8), ZSTD(1)),
    duration_nano        UInt64 CODEC(ZSTD(1)),
    status_code          UInt8,
    status_message       String CODEC(ZSTD(1)),
    has_error            UInt8,
    input                String CODEC(ZSTD(1)),
    output               String CODEC(ZSTD(1)),
    input_blob_id        String CODEC(ZSTD(1)),
    output_blob_id       String CODEC(ZSTD(1)),
    resource_attributes  String CODEC(ZSTD(1)),
    span_attributes      String CODEC(ZSTD(1)),
    scope_name           String CODEC(ZSTD(1)),
    scope_version        String CODEC(ZSTD(1)),
    scope_attributes     String CODEC(ZSTD(1)),
    resource_schema_url  String CODEC(ZSTD(1)),
    scope_schema_url     String CODEC(ZSTD(1)),
    usage_details        Map(LowCardinality(String), UInt64) CODEC(ZSTD(1)),
    cost_details         Map(LowCardinality(String), Decimal64(12)) CODEC(ZSTD(1)),
    pricing_snapshot     Map(LowCardinality(String), Decimal64(12)) CODEC(ZSTD(1)),
    total_cost           Nullable(Decimal64(12)) CODEC(ZSTD(1)),
    service_name         LowCardinality(String) CODEC(ZSTD(1)),
    model_name           LowCardinality(String) CODEC(ZSTD(1)),
    provider_name        LowCardinality(String) CODEC(ZSTD(1)),
    span_type            LowCardinality(String) CODEC(ZSTD(1)),
    level                LowCardinality(String) CODEC(ZSTD(1)),
    version              LowCardinality(String) CODEC(ZSTD(1)),
    user_id              String CODEC(ZSTD(1)),
    session_id           String CODEC(ZSTD(1)),
    environment          LowCardinality(String) CODEC(ZSTD(1)),
    events_timestamp     Array(DateTime64(9, 'UTC')) CODEC(ZSTD(1)),
    events_name          Array(String) CODEC(ZSTD(1)),
    events_attributes    Array(String) CODEC(ZSTD(1)),
    links_trace_id       Array(String) CODEC(ZSTD(1)),
    links_span_id        Array(String) CODEC(ZSTD(1)),
    links_trace_state    Array(String) CODEC(ZSTD(1)),
    links_attributes     Array(String) CODEC(ZSTD(1)),
    event_ts             DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    deleted_at           Nullable(DateTime64(9, 'UTC')),
    INDEX idx_trace_id trace_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_span_id span_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_parent_span_id parent_span_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_duration duration_nano TYPE minmax GRANULARITY 1
)
ENGINE = ReplacingMergeTree(event_ts)
PARTITION BY toDate(start_time)
ORDER BY (project_id, trace_id, span_id)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── Scores ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.scores
(
    score_id           String CODEC(ZSTD(1)),
    project_id         LowCardinality(String) CODEC(ZSTD(1)),
    organization_id    LowCardinality(String) CODEC(ZSTD(1)),
    trace_id           Nullable(String) CODEC(ZSTD(1)),
    span_id            Nullable(String) CODEC(ZSTD(1)),
    name               LowCardinality(String) CODEC(ZSTD(1)),
    value              Nullable(Float64) CODEC(Gorilla, ZSTD(1)),
    string_value       Nullable(String) CODEC(ZSTD(1)),
    score_type         LowCardinality(String) CODEC(ZSTD(1)),
    source             LowCardinality(String) CODEC(ZSTD(1)),
    reason             String CODEC(ZSTD(1)),
    metadata           String CODEC(ZSTD(1)),
    experiment_id      String CODEC(ZSTD(1)),
    experiment_item_id String CODEC(ZSTD(1)),
    timestamp          DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    INDEX idx_trace_id trace_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_span_id span_id TYPE bloom_filter(0.001) GRANULARITY 1
)
ENGINE = MergeTree
PARTITION BY toDate(timestamp)
ORDER BY (project_id, name, timestamp, score_id)
SETTINGS index_granularity = 8192",

    // ── MV: per-experiment score rollup ──
    r"CREATE MATERIALIZED VIEW IF NOT EXISTS loomtrace.scores_experiment_summary
ENGINE = AggregatingMergeTree()
ORDER BY (project_id, experiment_id, name)
AS SELECT
    project_id,
    experiment_id,
    name,
    countState() AS count_state,
    sumState(value) AS sum_state,
    minState(value) AS min_state,
    maxState(value) AS max_state
FROM loomtrace.scores
WHERE experiment_id != ''
GROUP BY project_id, experiment_id, name",

    // ── MV: daily per-score rollup ──
    r"CREATE MATERIALIZED VIEW IF NOT EXISTS loomtrace.scores_daily_summary
ENGINE = AggregatingMergeTree()
ORDER BY (project_id, name, day)
AS SELECT
    project_id,
    name,
    toDate(timestamp) AS day,
    countState() AS count_state,
    sumState(value) AS sum_state,
    minState(value) AS min_state,
    maxState(value) AS max_state
FROM loomtrace.scores
GROUP BY project_id, name, day",

    // ── MV: source × day counts ──
    r"CREATE MATERIALIZED VIEW IF NOT EXISTS loomtrace.scores_source_daily
ENGINE = AggregatingMergeTree()
ORDER BY (project_id, source, day)
AS SELECT
    project_id,
    source,
    toDate(timestamp) AS day,
    countState() AS count_state
FROM loomtrace.scores
GROUP BY project_id, source, day",

    // ── OTel logs ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_logs
(
    timestamp           DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    project_id          LowCardinality(String) CODEC(ZSTD(1)),
    trace_id            String CODEC(ZSTD(1)),
    span_id             String CODEC(ZSTD(1)),
    severity_text       LowCardinality(String) CODEC(ZSTD(1)),
    severity_number     UInt8,
    service_name        LowCardinality(String) CODEC(ZSTD(1)),
    body                String CODEC(ZSTD(1)),
    resource_attributes String CODEC(ZSTD(1)),
    scope_name          String CODEC(ZSTD(1)),
    scope_version       String CODEC(ZSTD(1)),
    scope_attributes    String CODEC(ZSTD(1)),
    log_attributes      String CODEC(ZSTD(1)),
    event_name          String CODEC(ZSTD(1)),
    INDEX idx_trace_id trace_id TYPE bloom_filter(0.001) GRANULARITY 1,
    INDEX idx_body body TYPE tokenbf_v1(32768, 3, 0) GRANULARITY 8
)
ENGINE = MergeTree
PARTITION BY toDate(timestamp)
ORDER BY (project_id, service_name, timestamp)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── Sum metrics (counters, cumulative sums) ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_metrics_sum
(
    project_id             LowCardinality(String) CODEC(ZSTD(1)),
    service_name           LowCardinality(String) CODEC(ZSTD(1)),
    metric_name            LowCardinality(String) CODEC(ZSTD(1)),
    metric_description     String CODEC(ZSTD(1)),
    metric_unit            String CODEC(ZSTD(1)),
    resource_attributes    String CODEC(ZSTD(1)),
    attributes             String CODEC(ZSTD(1)),
    start_time_unix        DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    time_unix              DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    value                  Float64 CODEC(Gorilla, ZSTD(1)),
    flags                  UInt32 CODEC(ZSTD(1)),
    aggregation_temporality Int32 CODEC(ZSTD(1)),
    is_monotonic           UInt8
)
ENGINE = MergeTree
PARTITION BY toDate(time_unix)
ORDER BY (project_id, service_name, metric_name, time_unix)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── Gauge metrics ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_metrics_gauge
(
    project_id          LowCardinality(String) CODEC(ZSTD(1)),
    service_name        LowCardinality(String) CODEC(ZSTD(1)),
    metric_name         LowCardinality(String) CODEC(ZSTD(1)),
    metric_description  String CODEC(ZSTD(1)),
    metric_unit         String CODEC(ZSTD(1)),
    resource_attributes String CODEC(ZSTD(1)),
    attributes          String CODEC(ZSTD(1)),
    start_time_unix     DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    time_unix           DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    value               Float64 CODEC(Gorilla, ZSTD(1)),
    flags               UInt32 CODEC(ZSTD(1))
)
ENGINE = MergeTree
PARTITION BY toDate(time_unix)
ORDER BY (project_id, service_name, metric_name, time_unix)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── Histogram metrics ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_metrics_histogram
(
    project_id             LowCardinality(String) CODEC(ZSTD(1)),
    service_name           LowCardinality(String) CODEC(ZSTD(1)),
    metric_name            LowCardinality(String) CODEC(ZSTD(1)),
    metric_description     String CODEC(ZSTD(1)),
    metric_unit            String CODEC(ZSTD(1)),
    resource_attributes    String CODEC(ZSTD(1)),
    attributes             String CODEC(ZSTD(1)),
    start_time_unix        DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    time_unix              DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    count                  UInt64 CODEC(Delta(8), ZSTD(1)),
    sum                    Float64 CODEC(ZSTD(1)),
    bucket_counts          Array(UInt64) CODEC(ZSTD(1)),
    explicit_bounds        Array(Float64) CODEC(ZSTD(1)),
    min                    Float64 CODEC(ZSTD(1)),
    max                    Float64 CODEC(ZSTD(1)),
    flags                  UInt32 CODEC(ZSTD(1)),
    aggregation_temporality Int32 CODEC(ZSTD(1))
)
ENGINE = MergeTree
PARTITION BY toDate(time_unix)
ORDER BY (project_id, service_name, metric_name, time_unix)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── Exponential histogram metrics ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_metrics_exponential_histogram
(
    project_id              LowCardinality(String) CODEC(ZSTD(1)),
    service_name            LowCardinality(String) CODEC(ZSTD(1)),
    metric_name             LowCardinality(String) CODEC(ZSTD(1)),
    metric_description      String CODEC(ZSTD(1)),
    metric_unit             String CODEC(ZSTD(1)),
    resource_attributes     String CODEC(ZSTD(1)),
    attributes              String CODEC(ZSTD(1)),
    start_time_unix         DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    time_unix               DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    count                   UInt64 CODEC(Delta(8), ZSTD(1)),
    sum                     Float64 CODEC(ZSTD(1)),
    scale                   Int32 CODEC(ZSTD(1)),
    zero_count              UInt64 CODEC(ZSTD(1)),
    positive_offset         Int32 CODEC(ZSTD(1)),
    positive_bucket_counts  Array(UInt64) CODEC(ZSTD(1)),
    negative_offset         Int32 CODEC(ZSTD(1)),
    negative_bucket_counts  Array(UInt64) CODEC(ZSTD(1)),
    min                     Float64 CODEC(ZSTD(1)),
    max                     Float64 CODEC(ZSTD(1)),
    flags                   UInt32 CODEC(ZSTD(1)),
    aggregation_temporality Int32 CODEC(ZSTD(1))
)
ENGINE = MergeTree
PARTITION BY toDate(time_unix)
ORDER BY (project_id, service_name, metric_name, time_unix)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── GenAI events ──
    r"CREATE TABLE IF NOT EXISTS loomtrace.otel_genai_events
(
    event_id   String CODEC(ZSTD(1)),
    project_id LowCardinality(String) CODEC(ZSTD(1)),
    trace_id   String CODEC(ZSTD(1)),
    span_id    String CODEC(ZSTD(1)),
    timestamp  DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1)),
    event_name LowCardinality(String) CODEC(ZSTD(1)),
    provider   LowCardinality(String) CODEC(ZSTD(1)),
    model      LowCardinality(String) CODEC(ZSTD(1)),
    role       LowCardinality(String) CODEC(ZSTD(1)),
    content    String CODEC(ZSTD(1)),
    attributes String CODEC(ZSTD(1)),
    INDEX idx_trace_id trace_id TYPE bloom_filter(0.001) GRANULARITY 1
)
ENGINE = MergeTree
PARTITION BY toDate(timestamp)
ORDER BY (project_id, timestamp, event_id)
SETTINGS index_granularity = 8192, ttl_only_drop_parts = 1",

    // ── Blob reference registry ──
    // Soft delete appends a higher version with is_deleted = 1; reads take
    // the max version per key.
    r"CREATE TABLE IF NOT EXISTS loomtrace.blob_storage_file_log
(
    project_id      LowCardinality(String) CODEC(ZSTD(1)),
    entity_type     LowCardinality(String) CODEC(ZSTD(1)),
    entity_id       String CODEC(ZSTD(1)),
    event_id        String CODEC(ZSTD(1)),
    bucket_name     LowCardinality(String) CODEC(ZSTD(1)),
    bucket_path     String CODEC(ZSTD(1)),
    file_size_bytes UInt64 CODEC(ZSTD(1)),
    content_type    LowCardinality(String) CODEC(ZSTD(1)),
    compression     LowCardinality(String) CODEC(ZSTD(1)),
    version         UInt32,
    is_deleted      UInt8,
    created_at      DateTime64(9, 'UTC') CODEC(Delta(8), ZSTD(1))
)
ENGINE = ReplacingMergeTree(version)
ORDER BY (project_id, entity_type, entity_id, event_id)
SETTINGS index_granularity = 8192",
];

/// Run all migrations against ClickHouse.
///
/// Connects **without** a default database so that `CREATE DATABASE`
/// succeeds even on a fresh instance. Every statement uses `IF NOT EXISTS`
/// so this is safe to call on every startup.
pub async fn run(url: &str, user: &str, password: &str) -> anyhow::Result<()> {
    let client = Client::default()
        .with_url(url)
        .with_user(user)
        .with_password(password);

    tracing::info!("running clickhouse migrations ({} statements)", MIGRATIONS.len());

    for (i, sql) in MIGRATIONS.iter().enumerate() {
        let preview: String = sql.chars().take(80).collect();
        tracing::debug!("migration {}/{}: {}...", i + 1, MIGRATIONS.len(), preview);
        client.query(sql).execute().await.map_err(|e| {
            tracing::error!("migration {}/{} failed: {e}", i + 1, MIGRATIONS.len());
            e
        })?;
    }

    tracing::info!("clickhouse migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_statements_idempotent() {
        for sql in MIGRATIONS {
            assert!(
                sql.contains("IF NOT EXISTS"),
                "non-idempotent migration: {}",
                &sql[..60.min(sql.len())]
            );
        }
    }

    #[test]
    fn test_required_tables_present() {
        let ddl = MIGRATIONS.join("\n");
        for table in [
            "otel_traces",
            "scores",
            "otel_logs",
            "otel_metrics_sum",
            "otel_metrics_gauge",
            "otel_metrics_histogram",
            "otel_metrics_exponential_histogram",
            "otel_genai_events",
            "blob_storage_file_log",
            "scores_experiment_summary",
            "scores_daily_summary",
            "scores_source_daily",
        ] {
            assert!(ddl.contains(table), "missing table {table}");
        }
    }
}
