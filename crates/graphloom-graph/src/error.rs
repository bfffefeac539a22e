//! Store-level failure taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Transport-level failure reaching the store.
    #[error("graph store unavailable: {0}")]
    StoreUnavailable(String),

    /// A merge key or dimension constraint was violated. Once migrations ran
    /// this indicates a bug, not an operational condition.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The query text did not parse, or referenced unknown variables or
    /// parameters.
    #[error("invalid query: {0}")]
    QueryInvalid(String),

    /// The query would mutate the graph.
    #[error("query is not read-only: {0}")]
    QueryNotReadOnly(String),

    /// A chunk or query vector disagreed with the index dimension.
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
