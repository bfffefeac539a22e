//! The embedded graph engine.
//!
//! Per-KB state lives behind a `DashMap` of `RwLock`ed stores. Nodes and
//! edges are `BTreeMap`s keyed by identity, which gives merge-by-identity
//! upserts, per-identity serialization under the KB write lock, and the
//! deterministic identity ordering the search tie-break and query engine
//! rely on.

use crate::error::GraphError;
use crate::migrate::{self, KbProvisioning, VectorIndex};
use crate::query;
use crate::store::GraphStore;
use crate::types::{
    ChunkRecord, EdgeKey, EdgeUpsert, GraphCounts, NodeIdentity, NodeRecord, NodeUpsert,
    Provenance, Row, SearchHit,
};
use crate::vector;
use crate::{SYSTEM_LABELS, SYSTEM_RELATIONSHIPS};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stored node payload (identity lives in the map key).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeState {
    pub(crate) key_property: String,
    pub(crate) props: BTreeMap<String, Value>,
    pub(crate) provenance: Provenance,
}

/// Stored edge payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EdgeState {
    pub(crate) props: BTreeMap<String, Value>,
    pub(crate) provenance: Provenance,
}

/// Everything one KB owns.
#[derive(Debug, Default)]
pub(crate) struct KbState {
    pub(crate) nodes: BTreeMap<NodeIdentity, NodeState>,
    pub(crate) edges: BTreeMap<EdgeKey, EdgeState>,
    pub(crate) chunks: BTreeMap<NodeIdentity, Vec<ChunkRecord>>,
    /// label → key_property, registered by migration v1.
    pub(crate) node_keys: BTreeMap<String, String>,
    pub(crate) relationship_types: BTreeSet<String>,
    pub(crate) vector_indexes: Vec<VectorIndex>,
    pub(crate) indexed_properties: BTreeSet<String>,
    pub(crate) migration_version: u32,
}

impl KbState {
    fn node_record(&self, identity: &NodeIdentity, state: &NodeState) -> NodeRecord {
        NodeRecord {
            identity: identity.clone(),
            key_property: state.key_property.clone(),
            props: state.props.clone(),
            provenance: state.provenance.clone(),
        }
    }
}

/// The embedded store. Cheap to clone handles via [`Arc`]; safe for
/// concurrent use across runs.
#[derive(Default)]
pub struct MemoryGraph {
    kbs: DashMap<String, Arc<RwLock<KbState>>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a snapshot file if it exists; subsequent [`flush`] calls
    /// rewrite it. A missing or unreadable snapshot starts empty — the store
    /// is the source of truth once running, so startup is best-effort.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let graph = Self {
            kbs: DashMap::new(),
            snapshot_path: Some(path.clone()),
        };
        if path.exists() {
            match crate::persistence::load(&path) {
                Ok(snapshot) => crate::persistence::restore(&graph, snapshot),
                Err(e) => warn!(path = %path.display(), error = %e, "snapshot load failed, starting empty"),
            }
        }
        graph
    }

    pub(crate) fn kb(&self, kb_id: &str) -> Arc<RwLock<KbState>> {
        self.kbs
            .entry(kb_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(KbState::default())))
            .clone()
    }

    pub(crate) fn kb_if_present(&self, kb_id: &str) -> Option<Arc<RwLock<KbState>>> {
        self.kbs.get(kb_id).map(|entry| entry.clone())
    }

    pub(crate) fn kb_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.kbs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Test hook: drop all state.
    pub fn clear(&self) {
        self.kbs.clear();
    }

    fn merge_provenance(existing: &mut Provenance, incoming: Provenance) {
        // `updated_at` is monotonic even if an older writer lands late.
        let updated_at = existing.updated_at.max(incoming.updated_at);
        *existing = incoming;
        existing.updated_at = updated_at;
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn ensure_kb(
        &self,
        kb_id: &str,
        provisioning: &KbProvisioning,
    ) -> Result<(), GraphError> {
        let kb = self.kb(kb_id);
        let mut state = kb.write();
        migrate::apply(kb_id, &mut state, provisioning)
    }

    async fn upsert_node(
        &self,
        kb_id: &str,
        upsert: NodeUpsert,
        provenance: Provenance,
    ) -> Result<(), GraphError> {
        let kb = self.kb(kb_id);
        let mut state = kb.write();

        if let Some(registered) = state.node_keys.get(&upsert.identity.label) {
            if registered != &upsert.key_property {
                return Err(GraphError::ConstraintViolation(format!(
                    "label `{}` is keyed by `{}`, upsert used `{}`",
                    upsert.identity.label, registered, upsert.key_property
                )));
            }
        }

        let mut props = upsert.props;
        props.insert(
            upsert.key_property.clone(),
            Value::String(upsert.identity.key.clone()),
        );

        match state.nodes.get_mut(&upsert.identity) {
            Some(existing) => {
                // Last-writer-wins per property; absent properties survive.
                existing.props.extend(props);
                Self::merge_provenance(&mut existing.provenance, provenance);
            }
            None => {
                state.nodes.insert(
                    upsert.identity,
                    NodeState {
                        key_property: upsert.key_property,
                        props,
                        provenance,
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert_edge(
        &self,
        kb_id: &str,
        upsert: EdgeUpsert,
        provenance: Provenance,
    ) -> Result<(), GraphError> {
        let kb = self.kb(kb_id);
        let mut state = kb.write();
        let key = EdgeKey {
            rel_type: upsert.rel_type,
            from: upsert.from,
            to: upsert.to,
        };
        match state.edges.get_mut(&key) {
            Some(existing) => {
                existing.props.extend(upsert.props);
                Self::merge_provenance(&mut existing.provenance, provenance);
            }
            None => {
                state.edges.insert(
                    key,
                    EdgeState {
                        props: upsert.props,
                        provenance,
                    },
                );
            }
        }
        Ok(())
    }

    async fn replace_chunks(
        &self,
        kb_id: &str,
        owner: &NodeIdentity,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), GraphError> {
        let kb = self.kb(kb_id);
        let mut state = kb.write();

        if chunks.is_empty() {
            // No-op when there is nothing stored either.
            if state.chunks.remove(owner).is_some() {
                debug!(kb_id, owner = %owner, "chunks cleared");
            }
            return Ok(());
        }

        let dimension = chunks[0].vector.len();
        for chunk in &chunks {
            if chunk.vector.len() != dimension {
                return Err(GraphError::DimensionMismatch {
                    expected: dimension,
                    got: chunk.vector.len(),
                });
            }
        }
        // Once a vector index exists for the label, replacements must match
        // one of its registered dimensions.
        let indexed: Vec<usize> = state
            .vector_indexes
            .iter()
            .filter(|idx| idx.label == owner.label)
            .map(|idx| idx.dimension)
            .collect();
        if !indexed.is_empty() && !indexed.contains(&dimension) {
            return Err(GraphError::DimensionMismatch {
                expected: *indexed.last().expect("non-empty"),
                got: dimension,
            });
        }

        state.chunks.insert(owner.clone(), chunks);
        Ok(())
    }

    async fn vector_search(
        &self,
        kb_id: &str,
        query: &[f32],
        top_k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>, GraphError> {
        let Some(kb) = self.kb_if_present(kb_id) else {
            return Ok(Vec::new());
        };
        let state = kb.read();

        // Best-scoring chunk per owning node. Chunks at a different
        // dimension (a superseded provider) are unreachable by design.
        let mut best: BTreeMap<NodeIdentity, (f32, &ChunkRecord)> = BTreeMap::new();
        for (owner, chunks) in &state.chunks {
            if let Some(filter) = label_filter {
                if owner.label != filter {
                    continue;
                }
            }
            for chunk in chunks {
                if chunk.vector.len() != query.len() {
                    continue;
                }
                let score = vector::cosine(query, &chunk.vector);
                match best.get(owner) {
                    Some((existing, _)) if *existing >= score => {}
                    _ => {
                        best.insert(owner.clone(), (score, chunk));
                    }
                }
            }
        }

        // Identity order is the BTreeMap order, so a stable sort by score
        // leaves ties in identity order.
        let mut hits: Vec<(NodeIdentity, f32, &ChunkRecord)> = best
            .into_iter()
            .map(|(identity, (score, chunk))| (identity, score, chunk))
            .collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);

        Ok(hits
            .into_iter()
            .map(|(identity, score, chunk)| {
                let props = state
                    .nodes
                    .get(&identity)
                    .map(|n| n.props.clone())
                    .unwrap_or_default();
                SearchHit {
                    identity,
                    score,
                    snippet: chunk.text.clone(),
                    props,
                }
            })
            .collect())
    }

    async fn graph_query(
        &self,
        kb_id: &str,
        query_text: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Vec<Row>, GraphError> {
        let Some(kb) = self.kb_if_present(kb_id) else {
            return query::execute(&KbState::default(), query_text, params);
        };
        let state = kb.read();
        query::execute(&state, query_text, params)
    }

    async fn count(&self, kb_id: &str) -> Result<GraphCounts, GraphError> {
        let Some(kb) = self.kb_if_present(kb_id) else {
            return Ok(GraphCounts::default());
        };
        let state = kb.read();
        let nodes = state
            .nodes
            .keys()
            .filter(|id| !SYSTEM_LABELS.contains(&id.label.as_str()))
            .count() as u64;
        let relationships = state
            .edges
            .keys()
            .filter(|key| !SYSTEM_RELATIONSHIPS.contains(&key.rel_type.as_str()))
            .count() as u64;
        Ok(GraphCounts {
            nodes,
            relationships,
        })
    }

    async fn get_node(
        &self,
        kb_id: &str,
        identity: &NodeIdentity,
    ) -> Result<Option<NodeRecord>, GraphError> {
        let Some(kb) = self.kb_if_present(kb_id) else {
            return Ok(None);
        };
        let state = kb.read();
        Ok(state
            .nodes
            .get(identity)
            .map(|node| state.node_record(identity, node)))
    }

    async fn nodes_with_label(
        &self,
        kb_id: &str,
        label: &str,
    ) -> Result<Vec<NodeRecord>, GraphError> {
        let Some(kb) = self.kb_if_present(kb_id) else {
            return Ok(Vec::new());
        };
        let state = kb.read();
        Ok(state
            .nodes
            .range(
                NodeIdentity::new(label, "")
                    ..NodeIdentity::new(format!("{label}\u{0}"), String::new()),
            )
            .map(|(identity, node)| state.node_record(identity, node))
            .collect())
    }

    async fn list_kbs(&self) -> Result<Vec<String>, GraphError> {
        Ok(self.kb_ids())
    }

    async fn flush(&self) -> Result<(), GraphError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        crate::persistence::save(self, path)
            .map_err(|e| GraphError::StoreUnavailable(format!("snapshot write failed: {e}")))
    }
}
