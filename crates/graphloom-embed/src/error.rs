//! Embedding failure taxonomy.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The backing service could not be reached or answered with an error.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// A returned vector disagreed with the registered dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// No provider is registered for the id's family.
    #[error("unknown embedding provider `{0}`")]
    UnknownProvider(String),

    /// The request-level timeout elapsed. Retry policy belongs to the
    /// caller.
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    /// The response parsed but did not have the expected shape.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}
