//! The ingestion coordinator.
//!
//! `ingest` allocates a run, snapshots the schema, and returns the run id
//! immediately; the run itself executes on a spawned task through the
//! pull → map → embed → write pipeline. At most one run is active per
//! `(kb, source)`; a second `ingest` while one is active returns the
//! existing run id.
//!
//! Fatal errors end the run; per-document mapping failures are recorded on
//! the run and skipped. Cancellation is cooperative: the flag is checked
//! between documents, before the embedding call, and before each document's
//! write batch. In-flight writes are not rolled back — the store merges are
//! idempotent, so partial progress is harmless.

use crate::config::IngestConfig;
use crate::connector::{ConnectorRegistry, PullLimits};
use crate::error::IngestError;
use crate::mapping::{self, DocumentOps};
use crate::runs::{RunId, RunTracker};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use graphloom_embed::ProviderRegistry;
use graphloom_graph::{
    ChunkRecord, GraphStore, KbProvisioning, LabelProvisioning, NodeIdentity, NodeUpsert,
    Provenance, VectorProvisioning,
};
use graphloom_schema::validate::{CompiledSchema, CompiledSource};
use graphloom_schema::SchemaRegistry;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

/// A registered `(kb, source)` pull target.
#[derive(Debug, Clone)]
struct SourceRegistration {
    connector_url: String,
    auth_ref: Option<String>,
}

pub struct IngestionCoordinator {
    registry: Arc<SchemaRegistry>,
    graph: Arc<dyn GraphStore>,
    embeddings: Arc<ProviderRegistry>,
    connectors: Arc<ConnectorRegistry>,
    tracker: Arc<RunTracker>,
    config: IngestConfig,
    sources: DashMap<(String, String), SourceRegistration>,
    /// Single-flight table: one active run per `(kb, source)`.
    active: DashMap<(String, String), RunId>,
    cancels: DashMap<RunId, Arc<AtomicBool>>,
}

impl IngestionCoordinator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        graph: Arc<dyn GraphStore>,
        embeddings: Arc<ProviderRegistry>,
        connectors: Arc<ConnectorRegistry>,
        tracker: Arc<RunTracker>,
        config: IngestConfig,
    ) -> Self {
        Self {
            registry,
            graph,
            embeddings,
            connectors,
            tracker,
            config,
            sources: DashMap::new(),
            active: DashMap::new(),
            cancels: DashMap::new(),
        }
    }

    /// Register a pull target. The source must be declared by the KB's
    /// schema. The URL is carried opaquely here; it is parsed and dispatched
    /// by the connector registry at pull time.
    pub fn add_source(
        &self,
        kb_id: &str,
        source_id: &str,
        connector_url: &str,
        auth_ref: Option<String>,
    ) -> Result<(), IngestError> {
        let schema = self
            .registry
            .get(kb_id)
            .ok_or_else(|| IngestError::KbNotFound(kb_id.to_string()))?;
        if schema.source(source_id).is_none() {
            return Err(IngestError::UnknownSource {
                kb_id: kb_id.to_string(),
                source_id: source_id.to_string(),
            });
        }
        self.sources.insert(
            (kb_id.to_string(), source_id.to_string()),
            SourceRegistration {
                connector_url: connector_url.to_string(),
                auth_ref,
            },
        );
        Ok(())
    }

    /// Start (or join) a run. Returns the run id as soon as the run record
    /// exists; the pipeline continues in the background.
    pub async fn ingest(
        self: &Arc<Self>,
        kb_id: &str,
        source_id: &str,
    ) -> Result<RunId, IngestError> {
        let schema = self
            .registry
            .get(kb_id)
            .ok_or_else(|| IngestError::KbNotFound(kb_id.to_string()))?;
        let key = (kb_id.to_string(), source_id.to_string());
        let registration = self
            .sources
            .get(&key)
            .map(|entry| entry.clone())
            .ok_or_else(|| IngestError::UnknownSource {
                kb_id: kb_id.to_string(),
                source_id: source_id.to_string(),
            })?;
        // The schema snapshot is captured here; a replacement registered
        // mid-run does not affect this run.
        let source = schema
            .source(source_id)
            .ok_or_else(|| IngestError::UnknownSource {
                kb_id: kb_id.to_string(),
                source_id: source_id.to_string(),
            })?
            .clone();

        let run_id = Uuid::new_v4().to_string();
        match self.active.entry(key.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(run_id.clone());
            }
        }
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels.insert(run_id.clone(), Arc::clone(&cancel));

        // A store failure here happens before the run exists, so it goes
        // back to the caller rather than onto a run record.
        if let Err(e) = self.tracker.start(kb_id, source_id, &run_id).await {
            self.active.remove(&key);
            self.cancels.remove(&run_id);
            return Err(e);
        }

        let coordinator = Arc::clone(self);
        let spawned_run_id = run_id.clone();
        tokio::spawn(async move {
            let result = coordinator
                .run_pipeline(
                    &schema,
                    &source,
                    &registration,
                    &key.0,
                    &key.1,
                    &spawned_run_id,
                    &cancel,
                )
                .await;
            if let Err(e) = &result {
                error!(run_id = %spawned_run_id, kind = e.kind(), error = %e, "run failed");
            }
            let outcome = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = coordinator.tracker.complete(&spawned_run_id, outcome).await {
                error!(run_id = %spawned_run_id, error = %e, "failed to persist run completion");
            }
            coordinator.active.remove(&key);
            coordinator.cancels.remove(&spawned_run_id);
            if let Err(e) = coordinator.graph.flush().await {
                error!(run_id = %spawned_run_id, error = %e, "snapshot flush failed");
            }
        });

        Ok(run_id)
    }

    /// Request cooperative cancellation. Returns whether the run was active.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.cancels.get(run_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Provisioning derived from the schema plus whatever dimensions the
    /// embedding registry knows right now.
    fn provisioning(&self, schema: &CompiledSchema) -> KbProvisioning {
        let descriptor = &schema.descriptor;
        let mut provisioning = KbProvisioning {
            labels: descriptor
                .nodes
                .iter()
                .map(|node| LabelProvisioning {
                    label: node.label.clone(),
                    key_property: node.key_property.clone(),
                })
                .collect(),
            relationship_types: descriptor
                .relationships
                .iter()
                .map(|rel| rel.rel_type.clone())
                .collect(),
            vectors: Vec::new(),
        };
        if let Some(embedding) = &descriptor.embedding {
            if let Some(dimension) = self.embeddings.dimension(&embedding.provider) {
                let embedded_labels: BTreeSet<&str> = schema
                    .sources
                    .values()
                    .map(|source| source.node_label.as_str())
                    .collect();
                for label in embedded_labels {
                    provisioning.vectors.push(VectorProvisioning {
                        label: label.to_string(),
                        provider: embedding.provider.clone(),
                        dimension,
                    });
                }
            }
        }
        provisioning
    }

    async fn store_op<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, graphloom_graph::GraphError>>,
    ) -> Result<T, IngestError> {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| IngestError::Timeout {
                operation: format!("store {operation}"),
            })?
            .map_err(IngestError::from)
    }

    fn anchor_upsert(schema: &CompiledSchema) -> NodeUpsert {
        let mut props = BTreeMap::new();
        if let Some(name) = &schema.descriptor.name {
            props.insert("name".to_string(), Value::String(name.clone()));
        }
        NodeUpsert::new(
            NodeIdentity::new("KnowledgeBase", schema.kb_id().to_string()),
            "kb_id",
            props,
        )
    }

    fn system_provenance(kb_id: &str, run_id: &str) -> Provenance {
        Provenance {
            kb_id: kb_id.to_string(),
            source_id: "system".to_string(),
            run_id: format!("kb-setup-{run_id}"),
            updated_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pipeline(
        &self,
        schema: &Arc<CompiledSchema>,
        source: &CompiledSource,
        registration: &SourceRegistration,
        kb_id: &str,
        source_id: &str,
        run_id: &str,
        cancel: &Arc<AtomicBool>,
    ) -> Result<(), IngestError> {
        // -- Start: provision the KB and its anchor node.
        self.store_op("ensure_kb", self.graph.ensure_kb(kb_id, &self.provisioning(schema)))
            .await?;
        self.store_op(
            "anchor upsert",
            self.graph.upsert_node(
                kb_id,
                Self::anchor_upsert(schema),
                Self::system_provenance(kb_id, run_id),
            ),
        )
        .await?;
        self.tracker.mark_running(run_id).await?;

        // -- Pull: one GET, the complete batch for this run.
        let limits = PullLimits {
            max_bytes: self.config.max_payload_bytes,
            timeout: self.config.connector_timeout,
        };
        let documents = tokio::time::timeout(
            self.config.connector_timeout,
            self.connectors.pull(
                &registration.connector_url,
                registration.auth_ref.as_deref(),
                &limits,
            ),
        )
        .await
        .map_err(|_| IngestError::Timeout {
            operation: "connector pull".to_string(),
        })??;
        info!(kb_id, source_id, run_id, documents = documents.len(), "connector pull complete");

        // -- Map: per-document failures are recorded, not fatal.
        let mut mapped: Vec<DocumentOps> = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                return Err(IngestError::Cancelled);
            }
            match mapping::apply_mapping(schema, source, document) {
                Ok(ops) => {
                    for warning in &ops.warnings {
                        self.tracker
                            .record_warning(run_id, format!("document {index}: {warning}"));
                    }
                    mapped.push(ops);
                }
                Err(e) => {
                    self.tracker
                        .record_error(run_id, format!("document {index}: {e}"));
                }
            }
        }

        // -- Embed: all chunk texts across the batch, one provider call per
        // internal batch. Any failure is fatal — chunks without vectors
        // would silently degrade retrieval.
        let mut chunk_sets: BTreeMap<usize, (NodeIdentity, Vec<ChunkRecord>)> = BTreeMap::new();
        if let Some(embedding) = &schema.descriptor.embedding {
            let mut texts: Vec<String> = Vec::new();
            let mut spans: Vec<(usize, usize, usize)> = Vec::new();
            for (index, ops) in mapped.iter().enumerate() {
                if let Some(plan) = &ops.chunks {
                    spans.push((index, texts.len(), plan.texts.len()));
                    texts.extend(plan.texts.iter().cloned());
                }
            }
            if !texts.is_empty() {
                if cancel.load(Ordering::SeqCst) {
                    return Err(IngestError::Cancelled);
                }
                let vectors = tokio::time::timeout(
                    self.config.embedding_timeout,
                    self.embeddings.embed(&embedding.provider, &texts),
                )
                .await
                .map_err(|_| IngestError::Timeout {
                    operation: "embedding".to_string(),
                })??;

                let provenance = Provenance {
                    kb_id: kb_id.to_string(),
                    source_id: source_id.to_string(),
                    run_id: run_id.to_string(),
                    updated_at: Utc::now(),
                };
                for (index, start, len) in spans {
                    let owner = mapped[index]
                        .chunks
                        .as_ref()
                        .map(|plan| plan.owner.clone())
                        .expect("span only exists for chunk plans");
                    let records = (0..len)
                        .map(|offset| ChunkRecord {
                            text: texts[start + offset].clone(),
                            vector: vectors[start + offset].clone(),
                            chunk_index: offset,
                            provenance: provenance.clone(),
                        })
                        .collect();
                    chunk_sets.insert(index, (owner, records));
                }
                // The registry may have just learned the dimension from the
                // response; re-provision so the vector index exists before
                // any chunk write.
                self.store_op(
                    "ensure_kb",
                    self.graph.ensure_kb(kb_id, &self.provisioning(schema)),
                )
                .await?;
            }
        }

        // -- Write: grouped per document under bounded parallelism; within
        // a document nodes precede edges precede chunk replacement.
        let semaphore = Arc::new(Semaphore::new(self.config.write_parallelism));
        let mut join_set: JoinSet<Result<(u64, u64, u64), IngestError>> = JoinSet::new();
        for (index, ops) in mapped.into_iter().enumerate() {
            let chunks = chunk_sets.remove(&index);
            let graph = Arc::clone(&self.graph);
            let semaphore = Arc::clone(&semaphore);
            let cancel = Arc::clone(cancel);
            let store_timeout = self.config.store_timeout;
            let kb = kb_id.to_string();
            let provenance = Provenance {
                kb_id: kb_id.to_string(),
                source_id: source_id.to_string(),
                run_id: run_id.to_string(),
                updated_at: Utc::now(),
            };
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| IngestError::Cancelled)?;
                if cancel.load(Ordering::SeqCst) {
                    return Err(IngestError::Cancelled);
                }
                let mut nodes = 0u64;
                let mut edges = 0u64;
                let mut chunk_count = 0u64;
                for node in ops.nodes {
                    tokio::time::timeout(
                        store_timeout,
                        graph.upsert_node(&kb, node, provenance.clone()),
                    )
                    .await
                    .map_err(|_| IngestError::Timeout {
                        operation: "store upsert_node".to_string(),
                    })??;
                    nodes += 1;
                }
                for edge in ops.edges {
                    tokio::time::timeout(
                        store_timeout,
                        graph.upsert_edge(&kb, edge, provenance.clone()),
                    )
                    .await
                    .map_err(|_| IngestError::Timeout {
                        operation: "store upsert_edge".to_string(),
                    })??;
                    edges += 1;
                }
                if let Some((owner, records)) = chunks {
                    chunk_count = records.len() as u64;
                    tokio::time::timeout(
                        store_timeout,
                        graph.replace_chunks(&kb, &owner, records),
                    )
                    .await
                    .map_err(|_| IngestError::Timeout {
                        operation: "store replace_chunks".to_string(),
                    })??;
                }
                Ok((nodes, edges, chunk_count))
            });
        }
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok((nodes, edges, chunks))) => {
                    self.tracker.record_document(run_id, nodes, edges, chunks);
                }
                Ok(Err(e)) => {
                    join_set.abort_all();
                    return Err(e);
                }
                Err(join_error) => {
                    join_set.abort_all();
                    return Err(IngestError::Store(
                        graphloom_graph::GraphError::StoreUnavailable(join_error.to_string()),
                    ));
                }
            }
        }

        // -- Finish: bump the KB anchor so `updated_at` reflects this run.
        self.store_op(
            "anchor update",
            self.graph.upsert_node(
                kb_id,
                Self::anchor_upsert(schema),
                Self::system_provenance(kb_id, run_id),
            ),
        )
        .await?;

        Ok(())
    }
}
