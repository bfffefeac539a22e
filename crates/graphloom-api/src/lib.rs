//! The Graphloom capability surface.
//!
//! [`Service`] wires the schema registry, graph store, embedding registry,
//! connector registry, run tracker, and ingestion coordinator together and
//! exposes the transport-agnostic capabilities: `register_schema`,
//! `validate_schema`, `add_source`, `ingest`, `cancel_run`,
//! `semantic_search`, `graph_query`, `sync_status`, `recent_runs`, and
//! `list_kbs`. Transports (JSON-RPC framing, HTTP routers) live outside
//! this workspace and call straight through.

pub mod error;
pub mod service;
pub mod telemetry;

pub use error::ApiError;
pub use service::Service;
