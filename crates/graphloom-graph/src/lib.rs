//! The Graphloom property graph store.
//!
//! Everything here is **per-KB scoped**: a knowledge base id accompanies
//! every operation, and no read or write can cross the tenancy boundary.
//! The crate provides:
//!
//! - [`store::GraphStore`]: the async adapter seam the rest of the system
//!   programs against,
//! - [`memory::MemoryGraph`]: the embedded engine implementing it, with
//!   identity-ordered node/edge maps (merge-by-identity upserts, wholesale
//!   chunk replacement),
//! - [`migrate`]: the versioned per-KB migration runner invoked by
//!   `ensure_kb`,
//! - [`query`]: a read-only, Cypher-shaped pattern query engine,
//! - [`vector`]: cosine similarity search over chunk vectors,
//! - [`persistence`]: JSON snapshot save/load so durable entities survive
//!   restarts.
//!
//! Upserts to distinct identities may run in parallel; upserts to the same
//! identity are serialized by the per-KB write lock.

pub mod error;
pub mod memory;
pub mod migrate;
pub mod persistence;
pub mod query;
pub mod store;
pub mod types;
pub mod vector;


pub use error::GraphError;
pub use memory::MemoryGraph;
pub use migrate::{KbProvisioning, LabelProvisioning, VectorProvisioning, MIGRATIONS};
pub use store::GraphStore;
pub use types::{
    ChunkRecord, EdgeKey, EdgeRecord, EdgeUpsert, GraphCounts, NodeIdentity, NodeRecord,
    NodeUpsert, Provenance, Row, SearchHit,
};

/// Node labels reserved for the system itself. Excluded from user-facing
/// counts.
pub const SYSTEM_LABELS: &[&str] = &["KnowledgeBase", "Run"];

/// Relationship types reserved for the system itself.
pub const SYSTEM_RELATIONSHIPS: &[&str] = &["PRODUCED_BY"];

/// Label of the chunk neighbors holding text and vectors.
pub const CHUNK_LABEL: &str = "Chunk";

/// Relationship from a node to its chunks.
pub const HAS_CHUNK: &str = "HAS_CHUNK";
