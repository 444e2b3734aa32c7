use axum::{Router, routing::get, routing::post, routing::put};
use clickhouse::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use loomtrace::blob_store::BlobStore;
use loomtrace::config::LoomConfig;
use loomtrace::dedup::DedupStore;
use loomtrace::handlers;
use loomtrace::ingest::IngestPipeline;
use loomtrace::meta_db::MetaDb;
use loomtrace::migrations;
use loomtrace::pricing::PricingResolver;
use loomtrace::score_store::ScoreStore;
use loomtrace::span_store::SpanStore;
use loomtrace::trace_agg::TraceAggregator;
use loomtrace::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("loomtrace=debug,tower_http=debug")
        }))
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "loomtrace".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    migrations::run(&clickhouse_url, &clickhouse_user, &clickhouse_password).await?;

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let meta_db_path =
        std::env::var("LOOM_META_DB").unwrap_or_else(|_| "./loom_meta.db".to_string());
    let meta = Arc::new(MetaDb::open(&meta_db_path)?);
    tracing::info!("meta db opened at {meta_db_path}");

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let dedup = DedupStore::connect(&redis_url)
        .await
        .map_err(|e| anyhow::anyhow!("dedup store: {e}"))?;
    tracing::info!("dedup store connected");

    let config_path = std::env::var("LOOM_CONFIG").unwrap_or_else(|_| "./loom.toml".to_string());
    let config = LoomConfig::load(&config_path)?;

    let pricing = Arc::new(PricingResolver::new(meta.clone()));
    let spans = SpanStore::new(ch.clone());
    let traces = TraceAggregator::new(ch.clone());
    let scores = ScoreStore::new(ch.clone());
    let blobs = BlobStore::new(ch.clone());
    let ingest = Arc::new(IngestPipeline::new(
        config.ingest.clone(),
        dedup.clone(),
        pricing.clone(),
        meta.clone(),
        spans.clone(),
        blobs.clone(),
        ch.clone(),
    ));

    let state = AppState {
        ch,
        meta,
        dedup,
        pricing,
        spans,
        traces,
        scores,
        blobs,
        ingest,
        config,
    };

    let app = Router::new()
        // Ingest
        .route("/api/v1/ingest", post(handlers::ingest::ingest_batch))
        // Batches
        .route("/api/v1/batches", get(handlers::batches::list_batches))
        .route("/api/v1/batches/{id}", get(handlers::batches::get_batch))
        .route(
            "/api/v1/batches/{id}/events",
            get(handlers::batches::list_batch_events),
        )
        .route(
            "/api/v1/batches/{id}/retry",
            post(handlers::batches::retry_batch),
        )
        // Spans
        .route("/api/v1/spans/query", post(handlers::spans::query_spans))
        .route(
            "/api/v1/spans/{span_id}",
            get(handlers::spans::get_span).delete(handlers::spans::delete_span),
        )
        .route(
            "/api/v1/spans/{span_id}/children",
            get(handlers::spans::get_children),
        )
        .route(
            "/api/v1/spans/{span_id}/scores",
            get(handlers::scores::get_scores_by_span),
        )
        // Traces
        .route("/api/v1/traces/query", post(handlers::traces::query_traces))
        .route(
            "/api/v1/traces/filter-options",
            get(handlers::traces::get_filter_options),
        )
        .route("/api/v1/traces/{trace_id}", get(handlers::traces::get_trace))
        .route(
            "/api/v1/traces/{trace_id}/summary",
            get(handlers::traces::get_trace_summary),
        )
        .route(
            "/api/v1/traces/{trace_id}/scores",
            get(handlers::scores::get_scores_by_trace),
        )
        // Scores
        .route(
            "/api/v1/scores",
            post(handlers::scores::create_score),
        )
        .route(
            "/api/v1/scores/batch",
            post(handlers::scores::create_score_batch),
        )
        .route("/api/v1/scores/query", post(handlers::scores::query_scores))
        .route(
            "/api/v1/scores/names",
            get(handlers::scores::get_distinct_names),
        )
        .route(
            "/api/v1/scores/analytics/statistics",
            get(handlers::scores::get_statistics),
        )
        .route(
            "/api/v1/scores/analytics/timeseries",
            get(handlers::scores::get_time_series),
        )
        .route(
            "/api/v1/scores/analytics/distribution",
            get(handlers::scores::get_distribution),
        )
        .route(
            "/api/v1/scores/analytics/heatmap",
            get(handlers::scores::get_heatmap),
        )
        .route(
            "/api/v1/scores/analytics/comparison",
            get(handlers::scores::get_comparison_metrics),
        )
        .route(
            "/api/v1/scores/summaries/experiments",
            get(handlers::scores::get_experiment_summaries),
        )
        .route(
            "/api/v1/scores/summaries/daily",
            get(handlers::scores::get_daily_summaries),
        )
        .route(
            "/api/v1/scores/summaries/sources",
            get(handlers::scores::get_source_daily_counts),
        )
        .route(
            "/api/v1/scores/{score_id}",
            get(handlers::scores::get_score)
                .put(handlers::scores::update_score)
                .delete(handlers::scores::delete_score),
        )
        // Filter presets
        .route(
            "/api/v1/filter-presets",
            get(handlers::presets::list_presets).post(handlers::presets::create_preset),
        )
        .route(
            "/api/v1/filter-presets/{id}",
            get(handlers::presets::get_preset)
                .put(handlers::presets::update_preset)
                .delete(handlers::presets::delete_preset),
        )
        // Relational trace/observation registry
        .route(
            "/api/v1/llm-traces",
            post(handlers::observations::register_trace)
                .get(handlers::observations::get_trace_by_external),
        )
        .route(
            "/api/v1/llm-traces/{id}",
            put(handlers::observations::update_trace),
        )
        .route(
            "/api/v1/llm-traces/{id}/observations",
            get(handlers::observations::list_trace_observations),
        )
        .route(
            "/api/v1/observations",
            post(handlers::observations::register_observation),
        )
        .route(
            "/api/v1/observations/{id}",
            get(handlers::observations::get_observation),
        )
        .route(
            "/api/v1/observations/{id}/outcome",
            put(handlers::observations::update_observation_outcome),
        )
        // Quality scores
        .route(
            "/api/v1/quality-scores",
            get(handlers::quality::list_quality_scores)
                .post(handlers::quality::create_quality_score),
        )
        .route(
            "/api/v1/quality-scores/aggregate",
            get(handlers::quality::aggregate_quality_scores),
        )
        .route(
            "/api/v1/quality-scores/distribution",
            get(handlers::quality::quality_score_distribution),
        )
        .route(
            "/api/v1/quality-scores/{id}",
            get(handlers::quality::get_quality_score)
                .delete(handlers::quality::delete_quality_score),
        )
        // Pricing
        .route(
            "/api/v1/model-pricing/resolve",
            get(handlers::pricing::resolve_pricing),
        )
        // Blob references
        .route(
            "/api/v1/blobs",
            get(handlers::blobs::list_blobs).post(handlers::blobs::record_blob),
        )
        .route(
            "/api/v1/blobs/{event_id}",
            get(handlers::blobs::get_blob).delete(handlers::blobs::delete_blob),
        )
        // Dedup
        .route("/api/v1/dedup/stats", get(handlers::dedup::get_stats))
        .route("/api/v1/dedup/{dedup_id}", get(handlers::dedup::get_claim))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("loomtrace-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
