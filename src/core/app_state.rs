use std::path::PathBuf;
use std::sync::Arc;

use sqlx::PgPool;

use crate::core::config;
use crate::core::embed::EmbedClient;
use crate::graph::GraphStore;
use crate::ingest::ner::NerCapability;
use crate::ingest::pii::PiiScanner;
use crate::search::rerank::RerankGateway;
use crate::search::CachedSearch;

/// Shared handles for HTTP handlers and background tasks. Everything here is
/// cheap to clone; the pool and caches are the only process-wide state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub http_client: reqwest::Client,
    pub embed: EmbedClient,
    pub reranker: RerankGateway,
    pub ner: Arc<NerCapability>,
    pub pii: Arc<PiiScanner>,
    // key: (query, limit). Entries carry their own TTL from the config table;
    // moka's time_to_live is only an eviction upper bound.
    pub search_cache: moka::future::Cache<(String, usize), CachedSearch>,
    // Bounded concurrency for drop-zone intake.
    pub ingest_limit: Arc<tokio::sync::Semaphore>,
    pub drop_zone: PathBuf,
    // Graph session shared by /health and /graph/nodes. None when the graph
    // store was unreachable at boot (the drainer also refuses to start).
    pub graph: Option<Arc<GraphStore>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("graph_connected", &self.graph.is_some())
            .field("reranker_enabled", &self.reranker.is_available())
            .field("ner_enabled", &self.ner.is_available())
            .finish()
    }
}

impl AppState {
    pub fn new(pool: PgPool, http_client: reqwest::Client) -> Self {
        let embed = EmbedClient::new(http_client.clone(), config::ollama_url());
        let reranker = RerankGateway::new(http_client.clone(), config::rerank_url());
        let ner = Arc::new(NerCapability::from_env());
        Self {
            pool,
            http_client,
            embed,
            reranker,
            ner,
            pii: Arc::new(PiiScanner::new()),
            search_cache: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(std::time::Duration::from_secs(60 * 60))
                .build(),
            ingest_limit: Arc::new(tokio::sync::Semaphore::new(10)),
            drop_zone: config::drop_zone_path(),
            graph: None,
        }
    }

    pub fn with_graph(mut self, graph: Arc<GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }
}
