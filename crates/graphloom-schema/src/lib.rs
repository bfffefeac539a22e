//! Declarative per-knowledge-base schemas for Graphloom.
//!
//! A schema describes, for one knowledge base (KB):
//! - the node labels and relationship types the KB may contain,
//! - how each external source's documents map onto those nodes and edges
//!   (via a restricted JSONPath dialect, compiled once at registration),
//! - and how node text is chunked and embedded.
//!
//! The crate has three layers:
//! - [`descriptor`]: the serde shapes of the raw schema JSON,
//! - [`paths`]: the path-expression parser and evaluator,
//! - [`validate`] / [`registry`]: layered validation producing a
//!   [`CompiledSchema`], and the process-wide registry holding one active
//!   schema per KB.
//!
//! Registration replaces a KB's schema atomically; readers hold `Arc`
//! snapshots, so in-flight ingestion runs keep the schema they started with.

pub mod descriptor;
pub mod paths;
pub mod registry;
pub mod validate;

pub use descriptor::{
    ChunkingSpec, EdgeMapping, EmbeddingSpec, EndpointSpec, ExtractSpec, Mappings, NodeDecl,
    RelationshipDecl, SchemaDescriptor, SourceMapping,
};
pub use paths::{PathExpr, PathParseError};
pub use registry::{Registered, SchemaRegistry};
pub use validate::{
    compile, CompiledEdge, CompiledEndpoint, CompiledSchema, CompiledSource, SchemaError,
    ValidationReport,
};
