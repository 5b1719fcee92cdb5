//! Deterministic chunk identity.
//!
//! Identity is derived from where a chunk lives, not from what it says:
//! `(docset, source, heading_path, chunk_index)` always maps to the same ids,
//! so re-indexing an unchanged source upserts over itself instead of
//! accumulating duplicates, and a changed chunk body overwrites its slot in
//! place.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Ids assigned to one chunk: the store point id and a short human-readable
/// key kept in the payload for display and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIdentity {
    /// UUIDv5 over the URL namespace; valid as a qdrant point id.
    pub point_id: String,
    /// "ch_" + first 24 hex chars of the SHA-256 of the same base string.
    pub chunk_key: String,
}

/// Derive the deterministic identity for a chunk slot. `heading_path` is the
/// joined heading string, empty when the chunk has none.
pub fn chunk_identity(
    docset: &str,
    source: &str,
    heading_path: &str,
    chunk_index: usize,
) -> ChunkIdentity {
    let base = format!("{}|{}|{}|{}", docset, source, heading_path, chunk_index);

    let point_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, base.as_bytes()).to_string();

    let digest = Sha256::digest(base.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    let chunk_key = format!("ch_{}", &hex[..24]);

    ChunkIdentity {
        point_id,
        chunk_key,
    }
}
