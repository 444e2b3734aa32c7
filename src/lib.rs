pub mod analytics;
pub mod blob_store;
pub mod config;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod ingest;
pub mod meta_db;
pub mod migrations;
pub mod models;
pub mod pricing;
pub mod query_builder;
pub mod score_store;
pub mod span_store;
pub mod trace_agg;

use clickhouse::Client;
use std::sync::Arc;

use blob_store::BlobStore;
use config::LoomConfig;
use dedup::DedupStore;
use ingest::IngestPipeline;
use meta_db::MetaDb;
use pricing::PricingResolver;
use score_store::ScoreStore;
use span_store::SpanStore;
use trace_agg::TraceAggregator;

#[derive(Clone)]
pub struct AppState {
    pub ch: Client,
    pub meta: Arc<MetaDb>,
    pub dedup: DedupStore,
    pub pricing: Arc<PricingResolver>,
    pub spans: SpanStore,
    pub traces: TraceAggregator,
    pub scores: ScoreStore,
    pub blobs: BlobStore,
    pub ingest: Arc<IngestPipeline>,
    pub config: LoomConfig,
}
