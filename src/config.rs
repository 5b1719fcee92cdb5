//! Environment-driven tuning knobs.
//!
//! Hot-path fusion parameters are cached in `OnceLock` statics after the
//! first read; request-shaping values (batch size, scroll limit, URLs) are
//! read per call so operators can adjust them between runs.

use std::sync::OnceLock;

// Cached fusion knobs (read once per process).
static HYBRID_ALPHA: OnceLock<f32> = OnceLock::new();
static RRF_K: OnceLock<f32> = OnceLock::new();
static VECTOR_MULT: OnceLock<usize> = OnceLock::new();
static BM25_MULT: OnceLock<usize> = OnceLock::new();

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse a fractional weight, rejecting NaN/inf and out-of-range values.
fn parse_fraction(name: &str, default: f32) -> f32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .filter(|w| w.is_finite() && (0.0..=1.0).contains(w))
        .unwrap_or(default)
}

/// Fusion method name, lowercase. Unknown values fall back to "rrf" at the
/// parse site rather than failing the query.
pub fn get_fusion_method() -> String {
    std::env::var("HYBRID_FUSION")
        .unwrap_or_else(|_| "rrf".to_string())
        .trim()
        .to_lowercase()
}

/// Vector-branch weight for min-max fusion (cached after first access).
pub fn get_hybrid_alpha() -> f32 {
    *HYBRID_ALPHA.get_or_init(|| parse_fraction("HYBRID_ALPHA", 0.6))
}

/// RRF rank constant k (cached after first access).
pub fn get_rrf_k() -> f32 {
    *RRF_K.get_or_init(|| {
        std::env::var("RRF_K")
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .filter(|k| k.is_finite() && *k > 0.0)
            .unwrap_or(60.0)
    })
}

/// Candidate-pool multiplier for the vector branch (cached).
pub fn get_vector_mult() -> usize {
    *VECTOR_MULT.get_or_init(|| parse_env("HYBRID_VECTOR_MULT", 4).max(1))
}

/// Candidate-pool multiplier for the lexical branch (cached).
pub fn get_bm25_mult() -> usize {
    *BM25_MULT.get_or_init(|| parse_env("HYBRID_BM25_MULT", 4).max(1))
}

/// Upper bound on points scrolled from the store during a lexical rebuild.
pub fn get_bm25_scroll_limit() -> usize {
    parse_env("BM25_SCROLL_LIMIT", 5000)
}

pub fn get_chunk_size() -> usize {
    parse_env("DEFAULT_CHUNK_SIZE", 900)
}

pub fn get_chunk_overlap() -> usize {
    parse_env("DEFAULT_CHUNK_OVERLAP", 120)
}

/// Texts per embedding API call during indexing.
pub fn get_embedding_batch_size() -> usize {
    parse_env("EMBEDDING_BATCH_SIZE", 32).max(1)
}

/// Pause between embedding batches, for rate-limited providers. 0 disables.
pub fn get_embedding_batch_cooldown_ms() -> u64 {
    parse_env("EMBEDDING_BATCH_COOLDOWN_MS", 0)
}

pub fn get_embedding_dimension() -> usize {
    parse_env("EMBEDDING_DIMENSION", 768)
}

pub fn get_embedding_model() -> String {
    std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".to_string())
}

pub fn get_embeddings_url() -> String {
    std::env::var("EMBEDDINGS_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string())
}

pub fn get_embeddings_api_key() -> Option<String> {
    std::env::var("EMBEDDINGS_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
}

/// Whether any embedding endpoint configuration is present in the
/// environment. Reported by health; the defaults above still apply when
/// absent.
pub fn embeddings_configured() -> bool {
    std::env::var("EMBEDDINGS_URL").is_ok() || get_embeddings_api_key().is_some()
}

pub fn get_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6333".to_string())
}

pub fn get_qdrant_collection() -> String {
    std::env::var("QDRANT_COLLECTION").unwrap_or_else(|_| "hybrid_rag_chunks".to_string())
}

pub fn get_docs_root() -> String {
    std::env::var("DOCS_ROOT").unwrap_or_else(|_| "./docs".to_string())
}

pub fn get_default_docset() -> String {
    std::env::var("DEFAULT_DOCSET").unwrap_or_else(|_| "docs".to_string())
}

/// Timeout applied to individual store and provider HTTP requests.
pub fn get_request_timeout_secs() -> u64 {
    parse_env("REQUEST_TIMEOUT_SECS", 120)
}
