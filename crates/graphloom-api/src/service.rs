//! The service facade.

use crate::error::ApiError;
use graphloom_embed::{EmbeddingConfig, ProviderRegistry};
use graphloom_graph::{GraphStore, MemoryGraph, Row, SearchHit};
use graphloom_ingest::{
    ConnectorRegistry, IngestConfig, IngestionCoordinator, KbStatus, RunId, RunRecord, RunTracker,
};
use graphloom_schema::registry::Registered;
use graphloom_schema::{SchemaRegistry, ValidationReport};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Everything wired together. Construction is cheap; clones share state
/// through the inner `Arc`s.
pub struct Service {
    registry: Arc<SchemaRegistry>,
    graph: Arc<dyn GraphStore>,
    embeddings: Arc<ProviderRegistry>,
    tracker: Arc<RunTracker>,
    coordinator: Arc<IngestionCoordinator>,
}

impl Service {
    /// Production wiring from environment configuration: embedded store
    /// (with snapshot persistence when `GRAPHLOOM_SNAPSHOT_PATH` is set),
    /// HTTP connectors, and the default embedding providers.
    pub fn from_env() -> Result<Self, ApiError> {
        let ingest_config = IngestConfig::from_env();
        let embed_config = EmbeddingConfig::from_env();
        let graph: Arc<dyn GraphStore> = match std::env::var("GRAPHLOOM_SNAPSHOT_PATH") {
            Ok(path) => Arc::new(MemoryGraph::with_persistence(path)),
            Err(_) => Arc::new(MemoryGraph::new()),
        };
        let connectors = Arc::new(ConnectorRegistry::with_http(
            ingest_config.connector_timeout,
        )?);
        let embeddings = Arc::new(ProviderRegistry::with_default_providers(&embed_config));
        Ok(Self::assemble(graph, embeddings, connectors, ingest_config))
    }

    /// Explicit wiring. Tests use this to inject static connectors and
    /// deterministic embedding providers.
    pub fn assemble(
        graph: Arc<dyn GraphStore>,
        embeddings: Arc<ProviderRegistry>,
        connectors: Arc<ConnectorRegistry>,
        config: IngestConfig,
    ) -> Self {
        let registry = Arc::new(SchemaRegistry::new());
        let tracker = Arc::new(RunTracker::new(Arc::clone(&graph), config.error_retention));
        let coordinator = Arc::new(IngestionCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&graph),
            Arc::clone(&embeddings),
            connectors,
            Arc::clone(&tracker),
            config,
        ));
        Self {
            registry,
            graph,
            embeddings,
            tracker,
            coordinator,
        }
    }

    /// Startup sweep: runs left non-terminal by a dead process become
    /// `failed(ProcessCrashed)`. Returns how many were swept.
    pub async fn startup(&self) -> Result<usize, ApiError> {
        let kbs = self.graph.list_kbs().await?;
        let swept = self.tracker.sweep_orphans(&kbs).await?;
        info!(kbs = kbs.len(), swept, "startup sweep complete");
        Ok(swept)
    }

    // ------------------------------------------------------------------
    // Schema capabilities
    // ------------------------------------------------------------------

    pub fn register_schema(&self, raw: &Value) -> Result<Registered, ApiError> {
        Ok(self.registry.register_value(raw)?)
    }

    /// Dry-run validation for tooling. Never stores.
    pub fn validate_schema(&self, raw: &Value) -> ValidationReport {
        SchemaRegistry::validate_value(raw)
    }

    pub fn list_kbs(&self) -> Vec<String> {
        self.registry.list_kbs()
    }

    // ------------------------------------------------------------------
    // Ingestion capabilities
    // ------------------------------------------------------------------

    pub fn add_source(
        &self,
        kb_id: &str,
        source_id: &str,
        connector_url: &str,
        auth_ref: Option<String>,
    ) -> Result<(), ApiError> {
        Ok(self
            .coordinator
            .add_source(kb_id, source_id, connector_url, auth_ref)?)
    }

    /// Start a run; returns its id immediately.
    pub async fn ingest(&self, kb_id: &str, source_id: &str) -> Result<RunId, ApiError> {
        Ok(self.coordinator.ingest(kb_id, source_id).await?)
    }

    /// Cooperatively cancel a run. `false` when it is not active.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        self.coordinator.cancel(run_id)
    }

    // ------------------------------------------------------------------
    // Retrieval capabilities
    // ------------------------------------------------------------------

    /// Embed the query text with the KB's provider, then search the chunk
    /// vectors.
    pub async fn semantic_search(
        &self,
        kb_id: &str,
        text: &str,
        top_k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>, ApiError> {
        let schema = self
            .registry
            .get(kb_id)
            .ok_or_else(|| ApiError::KbNotFound(kb_id.to_string()))?;
        let provider = schema
            .descriptor
            .embedding
            .as_ref()
            .map(|e| e.provider.clone())
            .ok_or_else(|| {
                ApiError::Embedding(graphloom_embed::EmbeddingError::Unavailable(format!(
                    "knowledge base `{kb_id}` declares no embedding provider"
                )))
            })?;
        let query_texts = vec![text.to_string()];
        let vectors = self.embeddings.embed(&provider, &query_texts).await?;
        let query = vectors.into_iter().next().ok_or_else(|| {
            ApiError::Embedding(graphloom_embed::EmbeddingError::MalformedResponse(
                "no vector returned for query text".to_string(),
            ))
        })?;
        Ok(self
            .graph
            .vector_search(kb_id, &query, top_k, label_filter)
            .await?)
    }

    /// Parameterized read-only graph query, scoped to the KB.
    pub async fn graph_query(
        &self,
        kb_id: &str,
        query_text: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Vec<Row>, ApiError> {
        if self.registry.get(kb_id).is_none() {
            return Err(ApiError::KbNotFound(kb_id.to_string()));
        }
        Ok(self.graph.graph_query(kb_id, query_text, params).await?)
    }

    // ------------------------------------------------------------------
    // Status capabilities
    // ------------------------------------------------------------------

    pub async fn sync_status(&self, kb_id: &str) -> Result<KbStatus, ApiError> {
        if self.registry.get(kb_id).is_none() {
            return Err(ApiError::KbNotFound(kb_id.to_string()));
        }
        Ok(self.tracker.status(kb_id).await?)
    }

    /// Recent runs, newest first, across one KB or all registered KBs.
    pub async fn recent_runs(
        &self,
        kb_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RunRecord>, ApiError> {
        let kbs = match kb_id {
            Some(kb) => vec![kb.to_string()],
            None => self.registry.list_kbs(),
        };
        Ok(self.tracker.recent_runs(&kbs, limit).await?)
    }

    /// Test hook: drop all registered schemas. Store contents are left
    /// alone — build a fresh `Service` for full isolation.
    pub fn reset_registries(&self) {
        self.registry.clear();
    }
}
