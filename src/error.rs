use thiserror::Error;

/// Errors surfaced by the retrieval engine.
///
/// The four variants partition failures by which collaborator misbehaved:
/// local settings, the embedding provider, the vector store, or the caller's
/// filter expression. The engine never retries any of them; retry policy
/// belongs to whoever called in.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid settings (bad chunk size/overlap, absent docs root).
    /// Fatal at startup or request entry.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Embedding API failure or timeout. Aborts the current indexing run or
    /// query; the indexing report says which sources already committed.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Vector database unreachable or request rejected. Aborts writes; read
    /// paths degrade only where the query engine explicitly allows it.
    #[error("vector store error: {0}")]
    Store(String),

    /// Unparseable filter expression, rejected before any retrieval work.
    #[error("filter error: {0}")]
    Filter(String),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn filter(msg: impl Into<String>) -> Self {
        Self::Filter(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
