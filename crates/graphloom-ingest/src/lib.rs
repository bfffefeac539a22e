//! Ingestion: pull → map → embed → write.
//!
//! - [`mapping`]: the pure engine turning one document into node/edge
//!   upserts and chunk text under a compiled schema,
//! - [`connector`]: the pull seam, dispatched by URL scheme,
//! - [`runs`]: run lifecycle tracking, persisted into the graph store,
//! - [`coordinator`]: the per-`(kb, source)` run orchestration with bounded
//!   write parallelism and cooperative cancellation,
//! - [`config`]: the environment-driven knobs.
//!
//! One run is one connector pull treated as a complete batch. Per-document
//! mapping failures are recorded and skipped; everything else is fatal to
//! the run. Re-running against identical connector content is a no-op in
//! the graph (idempotent merges, wholesale chunk replacement).

pub mod config;
pub mod connector;
pub mod coordinator;
pub mod error;
pub mod mapping;
pub mod runs;

pub use config::IngestConfig;
pub use connector::{Connector, ConnectorRegistry, HttpConnector, PullLimits, StaticConnector};
pub use coordinator::IngestionCoordinator;
pub use error::{DocumentMappingError, IngestError};
pub use mapping::{apply_mapping, ChunkPlan, DocumentOps};
pub use runs::{KbStatus, RunId, RunRecord, RunState, RunTracker, SourceStatus};
