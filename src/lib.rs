//! Hybrid retrieval and indexing engine.
//!
//! Markdown-aware chunking, deterministic chunk identity, an OpenAI-style
//! embedding gateway, an in-memory BM25 index rebuilt on demand from the
//! vector store, and a query path that fuses both branches with reciprocal
//! rank fusion or min-max weighting.

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod filters;
pub mod fusion;
pub mod identity;
pub mod lexical;
pub mod progress_logger;
pub mod store;

pub use embeddings::{EmbeddingProvider, HashEmbedder, HttpEmbeddingProvider};
pub use engine::{HybridEngine, IndexRequest, IndexReport, QueryRequest, QueryResponse};
pub use error::{EngineError, Result};
pub use store::{MemoryStore, QdrantStore, VectorStore};
