//! Surface-level failure taxonomy.

use graphloom_embed::EmbeddingError;
use graphloom_graph::GraphError;
use graphloom_ingest::IngestError;
use graphloom_schema::SchemaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    SchemaInvalid(#[from] SchemaError),

    #[error("knowledge base `{0}` has no registered schema")]
    KbNotFound(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl ApiError {
    /// Stable kind tag for transports that map errors onto wire codes.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::SchemaInvalid(_) => "SchemaInvalid",
            ApiError::KbNotFound(_) => "KbNotFound",
            ApiError::Ingest(e) => e.kind(),
            ApiError::Graph(GraphError::QueryInvalid(_)) => "QueryInvalid",
            ApiError::Graph(GraphError::QueryNotReadOnly(_)) => "QueryNotReadOnly",
            ApiError::Graph(_) => "StoreUnavailable",
            ApiError::Embedding(EmbeddingError::DimensionMismatch { .. }) => {
                "EmbeddingDimensionMismatch"
            }
            ApiError::Embedding(_) => "EmbeddingUnavailable",
        }
    }
}
