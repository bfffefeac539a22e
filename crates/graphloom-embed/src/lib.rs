//! Chunking and embedding for Graphloom.
//!
//! [`chunker`] turns a node's textual properties into chunk texts according
//! to the schema's chunking strategy. [`provider`] turns chunk texts into
//! fixed-dimension vectors through interchangeable providers addressed by
//! the `"<family>:<model>"` half of a schema's `provider` id.
//!
//! Providers are pure with respect to `(provider_id, texts)`: the same
//! inputs produce the same vectors, output order matches input order, and a
//! vector of the wrong length is an error, never a silent degradation.

pub mod chunker;
pub mod error;
pub mod provider;

pub use chunker::chunk_text;
pub use error::EmbeddingError;
pub use provider::{
    EmbeddingConfig, EmbeddingProvider, HashEmbeddingProvider, LocalHttpProvider,
    ProviderRegistry, RemoteHttpProvider,
};
