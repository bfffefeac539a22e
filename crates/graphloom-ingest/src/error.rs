//! Ingestion failure taxonomy.
//!
//! [`DocumentMappingError`] is the only locally-recovered failure: it is
//! recorded on the run and the next document proceeds. Every other variant
//! terminates its run.

use graphloom_embed::EmbeddingError;
use graphloom_graph::GraphError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("knowledge base `{0}` has no registered schema")]
    KbNotFound(String),

    #[error("source `{source_id}` is not declared in knowledge base `{kb_id}`")]
    UnknownSource { kb_id: String, source_id: String },

    /// Transport failure or non-2xx from the connector.
    #[error("connector unavailable: {0}")]
    ConnectorUnavailable(String),

    #[error("connector response too large: {size} bytes exceeds the {limit} byte limit")]
    ConnectorResponseTooLarge { size: usize, limit: usize },

    /// The body was not a JSON array of documents.
    #[error("connector response malformed: {0}")]
    ConnectorMalformed(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] GraphError),

    /// Cooperative cancellation observed at a checkpoint.
    #[error("run cancelled")]
    Cancelled,

    #[error("{operation} timed out")]
    Timeout { operation: String },
}

impl IngestError {
    /// Stable kind tag used in run records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::KbNotFound(_) => "KbNotFound",
            IngestError::UnknownSource { .. } => "UnknownSource",
            IngestError::ConnectorUnavailable(_) => "ConnectorUnavailable",
            IngestError::ConnectorResponseTooLarge { .. } => "ConnectorResponseTooLarge",
            IngestError::ConnectorMalformed(_) => "ConnectorMalformed",
            IngestError::Embedding(EmbeddingError::DimensionMismatch { .. }) => {
                "EmbeddingDimensionMismatch"
            }
            IngestError::Embedding(EmbeddingError::Timeout(_)) => "Timeout",
            IngestError::Embedding(_) => "EmbeddingUnavailable",
            IngestError::Store(_) => "StoreUnavailable",
            IngestError::Cancelled => "Cancelled",
            IngestError::Timeout { .. } => "Timeout",
        }
    }
}

/// Per-document mapping failure. Non-fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentMappingError {
    /// The extract key path selected nothing usable (absent, null, empty
    /// string, or a composite value).
    #[error("key path `{path}` selected no usable value")]
    MissingKey { path: String },
}
