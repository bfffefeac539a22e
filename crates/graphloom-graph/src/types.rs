//! Record and identity types for the per-KB graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identity of a node within one KB: `(label, key_value)`.
///
/// `Ord` derives field order (label, then key), which is the identity
/// ordering used for search tie-breaks and deterministic iteration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub label: String,
    pub key: String,
}

impl NodeIdentity {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.label, self.key)
    }
}

/// Identity of an edge within one KB.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub rel_type: String,
    pub from: NodeIdentity,
    pub to: NodeIdentity,
}

/// Provenance attached to every stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub kb_id: String,
    pub source_id: String,
    pub run_id: String,
    pub updated_at: DateTime<Utc>,
}

/// A node as stored (or returned from a read).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub identity: NodeIdentity,
    pub key_property: String,
    pub props: BTreeMap<String, Value>,
    pub provenance: Provenance,
}

/// An edge as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub key: EdgeKey,
    pub props: BTreeMap<String, Value>,
    pub provenance: Provenance,
}

/// A chunk: one text fragment plus its vector, owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    pub vector: Vec<f32>,
    pub chunk_index: usize,
    pub provenance: Provenance,
}

/// A node write. Properties omitted here never erase stored values.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpsert {
    pub identity: NodeIdentity,
    pub key_property: String,
    pub props: BTreeMap<String, Value>,
}

impl NodeUpsert {
    pub fn new(
        identity: NodeIdentity,
        key_property: impl Into<String>,
        props: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            identity,
            key_property: key_property.into(),
            props,
        }
    }
}

/// An edge write.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeUpsert {
    pub rel_type: String,
    pub from: NodeIdentity,
    pub to: NodeIdentity,
    pub props: BTreeMap<String, Value>,
}

/// User-facing entity counts for one KB (system records excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GraphCounts {
    pub nodes: u64,
    pub relationships: u64,
}

/// One vector-search result, resolved back to its owning node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub identity: NodeIdentity,
    pub score: f32,
    /// Text of the best-matching chunk.
    pub snippet: String,
    pub props: BTreeMap<String, Value>,
}

/// One row of a graph query result.
pub type Row = BTreeMap<String, Value>;
