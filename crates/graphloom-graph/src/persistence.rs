//! JSON snapshot persistence for the embedded engine.
//!
//! The snapshot is a plain serde document: per-KB node/edge/chunk records
//! plus the migration bookkeeping. Saving writes to a sibling temp file and
//! renames over the target so a crash mid-write never corrupts the previous
//! snapshot.

use crate::memory::{EdgeState, KbState, MemoryGraph, NodeState};
use crate::migrate::VectorIndex;
use crate::types::{ChunkRecord, EdgeRecord, NodeIdentity, NodeRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub kbs: BTreeMap<String, KbSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KbSnapshot {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
    chunks: Vec<OwnedChunks>,
    node_keys: BTreeMap<String, String>,
    relationship_types: BTreeSet<String>,
    vector_indexes: Vec<VectorIndex>,
    indexed_properties: BTreeSet<String>,
    migration_version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OwnedChunks {
    owner: NodeIdentity,
    chunks: Vec<ChunkRecord>,
}

/// Capture the full store.
pub fn snapshot(graph: &MemoryGraph) -> GraphSnapshot {
    let mut kbs = BTreeMap::new();
    for kb_id in graph.kb_ids() {
        let Some(kb) = graph.kb_if_present(&kb_id) else {
            continue;
        };
        let state = kb.read();
        kbs.insert(kb_id, snapshot_kb(&state));
    }
    GraphSnapshot { kbs }
}

fn snapshot_kb(state: &KbState) -> KbSnapshot {
    KbSnapshot {
        nodes: state
            .nodes
            .iter()
            .map(|(identity, node)| NodeRecord {
                identity: identity.clone(),
                key_property: node.key_property.clone(),
                props: node.props.clone(),
                provenance: node.provenance.clone(),
            })
            .collect(),
        edges: state
            .edges
            .iter()
            .map(|(key, edge)| EdgeRecord {
                key: key.clone(),
                props: edge.props.clone(),
                provenance: edge.provenance.clone(),
            })
            .collect(),
        chunks: state
            .chunks
            .iter()
            .map(|(owner, chunks)| OwnedChunks {
                owner: owner.clone(),
                chunks: chunks.clone(),
            })
            .collect(),
        node_keys: state.node_keys.clone(),
        relationship_types: state.relationship_types.clone(),
        vector_indexes: state.vector_indexes.clone(),
        indexed_properties: state.indexed_properties.clone(),
        migration_version: state.migration_version,
    }
}

/// Rebuild a store from a snapshot.
pub fn restore(graph: &MemoryGraph, snapshot: GraphSnapshot) {
    for (kb_id, kb_snapshot) in snapshot.kbs {
        let kb = graph.kb(&kb_id);
        let mut state = kb.write();
        *state = restore_kb(kb_snapshot);
    }
}

fn restore_kb(snapshot: KbSnapshot) -> KbState {
    let mut state = KbState {
        node_keys: snapshot.node_keys,
        relationship_types: snapshot.relationship_types,
        vector_indexes: snapshot.vector_indexes,
        indexed_properties: snapshot.indexed_properties,
        migration_version: snapshot.migration_version,
        ..KbState::default()
    };
    for record in snapshot.nodes {
        state.nodes.insert(
            record.identity,
            NodeState {
                key_property: record.key_property,
                props: record.props,
                provenance: record.provenance,
            },
        );
    }
    for record in snapshot.edges {
        state.edges.insert(
            record.key,
            EdgeState {
                props: record.props,
                provenance: record.provenance,
            },
        );
    }
    for owned in snapshot.chunks {
        state.chunks.insert(owned.owner, owned.chunks);
    }
    state
}

/// Write the snapshot file atomically.
pub fn save(graph: &MemoryGraph, path: &Path) -> Result<(), PersistenceError> {
    let snapshot = snapshot(graph);
    let encoded = serde_json::to_vec(&snapshot)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &encoded)?;
    std::fs::rename(&tmp, path)?;
    info!(path = %path.display(), kbs = snapshot.kbs.len(), "snapshot written");
    Ok(())
}

/// Read a snapshot file.
pub fn load(path: &Path) -> Result<GraphSnapshot, PersistenceError> {
    let contents = std::fs::read(path)?;
    Ok(serde_json::from_slice(&contents)?)
}
