//! The graph store adapter seam.

use crate::error::GraphError;
use crate::migrate::KbProvisioning;
use crate::types::{
    ChunkRecord, EdgeUpsert, GraphCounts, NodeIdentity, NodeRecord, NodeUpsert, Provenance, Row,
    SearchHit,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Adapter over the property graph database. Every operation is scoped to a
/// single KB; implementations must never let one KB observe another's data.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Provision constraints and vector indexes for a KB. Idempotent and
    /// safe to call concurrently per KB.
    async fn ensure_kb(&self, kb_id: &str, provisioning: &KbProvisioning)
        -> Result<(), GraphError>;

    /// Merge a node on `(kb_id, label, key)`. Last-writer-wins per property;
    /// properties absent from the upsert are left untouched.
    async fn upsert_node(
        &self,
        kb_id: &str,
        upsert: NodeUpsert,
        provenance: Provenance,
    ) -> Result<(), GraphError>;

    /// Merge an edge on `(kb_id, type, from, to)`.
    async fn upsert_edge(
        &self,
        kb_id: &str,
        upsert: EdgeUpsert,
        provenance: Provenance,
    ) -> Result<(), GraphError>;

    /// Atomically replace the full chunk set of a node. No-op when both the
    /// stored set and the replacement are empty.
    async fn replace_chunks(
        &self,
        kb_id: &str,
        owner: &NodeIdentity,
        chunks: Vec<ChunkRecord>,
    ) -> Result<(), GraphError>;

    /// Cosine similarity over the KB's chunk vectors. At most `top_k` hits,
    /// one per owning node, ties broken by node identity order. Chunks whose
    /// dimension differs from the query vector are unreachable.
    async fn vector_search(
        &self,
        kb_id: &str,
        query: &[f32],
        top_k: usize,
        label_filter: Option<&str>,
    ) -> Result<Vec<SearchHit>, GraphError>;

    /// Execute a parameterized read-only query scoped to the KB.
    async fn graph_query(
        &self,
        kb_id: &str,
        query_text: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Vec<Row>, GraphError>;

    /// User-facing entity counts (system records excluded).
    async fn count(&self, kb_id: &str) -> Result<GraphCounts, GraphError>;

    /// Point read of one node.
    async fn get_node(
        &self,
        kb_id: &str,
        identity: &NodeIdentity,
    ) -> Result<Option<NodeRecord>, GraphError>;

    /// All nodes carrying a label, in identity order. Used by the run
    /// tracker to load `Run` records.
    async fn nodes_with_label(
        &self,
        kb_id: &str,
        label: &str,
    ) -> Result<Vec<NodeRecord>, GraphError>;

    /// Every KB the store holds data for, sorted. Used by the startup sweep
    /// — schemas are process state, but runs persist here.
    async fn list_kbs(&self) -> Result<Vec<String>, GraphError>;

    /// Persist durable state, if the implementation is backed by a snapshot.
    async fn flush(&self) -> Result<(), GraphError>;
}
