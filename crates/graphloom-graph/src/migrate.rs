//! Versioned per-KB migrations.
//!
//! `ensure_kb` runs every step in order on each call; steps are idempotent,
//! so re-running after a schema change applies exactly the missing pieces
//! (new labels, new vector indexes). The highest applied version is recorded
//! on the KB.

use crate::error::GraphError;
use crate::memory::KbState;
use crate::{SYSTEM_LABELS, SYSTEM_RELATIONSHIPS};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a KB needs provisioned, derived from its registered schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KbProvisioning {
    pub labels: Vec<LabelProvisioning>,
    pub relationship_types: Vec<String>,
    /// One entry per embedded label whose provider dimension is known.
    pub vectors: Vec<VectorProvisioning>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelProvisioning {
    pub label: String,
    pub key_property: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorProvisioning {
    pub label: String,
    pub provider: String,
    pub dimension: usize,
}

/// A vector index as recorded on a KB. Superseded indexes are kept; chunks
/// embedded under an older dimension stay stored but become unreachable to
/// searches issued at the new dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    pub label: String,
    pub provider: String,
    pub dimension: usize,
}

/// One migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
}

/// The ordered migration sequence.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "unique node key constraint per declared label",
    },
    Migration {
        version: 2,
        description: "relationship identity constraint per declared type",
    },
    Migration {
        version: 3,
        description: "vector index per embedded label",
    },
    Migration {
        version: 4,
        description: "secondary indexes on node keys and provenance timestamps",
    },
];

/// Apply all steps to one KB. Idempotent.
pub(crate) fn apply(
    kb_id: &str,
    state: &mut KbState,
    provisioning: &KbProvisioning,
) -> Result<(), GraphError> {
    for migration in MIGRATIONS {
        match migration.version {
            1 => apply_node_keys(state, provisioning)?,
            2 => apply_relationship_types(state, provisioning),
            3 => apply_vector_indexes(state, provisioning),
            4 => apply_secondary_indexes(state, provisioning),
            _ => unreachable!("unknown migration version"),
        }
        if state.migration_version < migration.version {
            debug!(kb_id, version = migration.version, "migration applied");
            state.migration_version = migration.version;
        }
    }
    Ok(())
}

fn apply_node_keys(state: &mut KbState, provisioning: &KbProvisioning) -> Result<(), GraphError> {
    // System labels come first so user schemas cannot repurpose them.
    for (label, key_property) in [("KnowledgeBase", "kb_id"), ("Run", "run_id")] {
        state
            .node_keys
            .entry(label.to_string())
            .or_insert_with(|| key_property.to_string());
    }
    for label in &provisioning.labels {
        if SYSTEM_LABELS.contains(&label.label.as_str()) {
            return Err(GraphError::ConstraintViolation(format!(
                "label `{}` is reserved",
                label.label
            )));
        }
        match state.node_keys.get(&label.label) {
            Some(existing) if existing != &label.key_property => {
                return Err(GraphError::ConstraintViolation(format!(
                    "label `{}` already keyed by `{}`, cannot re-key as `{}`",
                    label.label, existing, label.key_property
                )));
            }
            Some(_) => {}
            None => {
                state
                    .node_keys
                    .insert(label.label.clone(), label.key_property.clone());
            }
        }
    }
    Ok(())
}

fn apply_relationship_types(state: &mut KbState, provisioning: &KbProvisioning) {
    for rel_type in SYSTEM_RELATIONSHIPS {
        state.relationship_types.insert((*rel_type).to_string());
    }
    for rel_type in &provisioning.relationship_types {
        state.relationship_types.insert(rel_type.clone());
    }
}

fn apply_vector_indexes(state: &mut KbState, provisioning: &KbProvisioning) {
    for vector in &provisioning.vectors {
        let exists = state.vector_indexes.iter().any(|idx| {
            idx.label == vector.label
                && idx.provider == vector.provider
                && idx.dimension == vector.dimension
        });
        if !exists {
            state.vector_indexes.push(VectorIndex {
                label: vector.label.clone(),
                provider: vector.provider.clone(),
                dimension: vector.dimension,
            });
        }
    }
}

fn apply_secondary_indexes(state: &mut KbState, provisioning: &KbProvisioning) {
    state.indexed_properties.insert("updated_at".to_string());
    for label in &provisioning.labels {
        state
            .indexed_properties
            .insert(format!("{}.{}", label.label, label.key_property));
    }
}
