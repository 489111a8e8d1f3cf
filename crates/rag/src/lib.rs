//! Retrieval engine
//!
//! Dense candidates from the configured vector store, optional lexical
//! candidates from an in-process tantivy index, merged and ranked by score.
//! An ultra-low-latency mode serves repeated queries from a TTL cache keyed
//! by normalised query text.

pub mod cache;
pub mod embedder;
pub mod engine;
pub mod qdrant;
pub mod sparse;

pub use cache::QueryCache;
pub use embedder::HashEmbedder;
pub use engine::{trim_to_token_budget, RetrievalConfig, RetrievalEngine};
pub use qdrant::{QdrantStore, QdrantStoreConfig};
pub use sparse::SparseIndex;

use thiserror::Error;

/// Retrieval errors.
#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("lexical index error: {0}")]
    Sparse(String),
}
