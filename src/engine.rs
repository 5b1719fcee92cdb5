//! Indexing orchestration and hybrid query execution.
//!
//! The engine owns the lexical index and coordinates the chunker, the
//! embedding provider and the vector store. Indexing runs are serialized per
//! docset; queries run concurrently and share the lexical cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use walkdir::WalkDir;

use crate::chunker::{chunk_markdown, chunk_plain, ChunkOptions, ChunkPiece};
use crate::config;
use crate::embeddings::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::filters::FilterExpr;
use crate::fusion::{self, FusionMethod};
use crate::identity::chunk_identity;
use crate::lexical::Bm25Index;
use crate::progress_logger::{BatchProgress, ProgressLogger, ProgressState, Stage};
use crate::store::{ChunkPayload, ChunkRecord, VectorStore};

fn default_true() -> bool {
    true
}

fn default_max_files() -> usize {
    200
}

fn default_preview_files() -> usize {
    20
}

fn default_preview_chunks_per_file() -> usize {
    3
}

fn default_preview_chars() -> usize {
    320
}

fn default_top_k() -> usize {
    5
}

fn default_snippet_chars() -> usize {
    1200
}

/// Parameters for one indexing run over a docs directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub docs_root: String,
    pub docset: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Drop and re-create the whole collection before indexing.
    #[serde(default)]
    pub recreate: bool,
    /// Delete the docset's existing chunks before the first upsert, so
    /// removed or re-chunked documents do not leave stale points behind.
    #[serde(default = "default_true")]
    pub replace_docset: bool,
    #[serde(default = "default_true")]
    pub preview: bool,
    #[serde(default = "default_preview_files")]
    pub preview_files: usize,
    #[serde(default = "default_preview_chunks_per_file")]
    pub preview_chunks_per_file: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl IndexRequest {
    pub fn new(docs_root: impl Into<String>, docset: impl Into<String>) -> Self {
        Self {
            docs_root: docs_root.into(),
            docset: docset.into(),
            max_files: default_max_files(),
            recreate: false,
            replace_docset: true,
            preview: true,
            preview_files: default_preview_files(),
            preview_chunks_per_file: default_preview_chunks_per_file(),
            preview_chars: default_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub source: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFile {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleChunk {
    pub chars: usize,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewEntry {
    pub source: String,
    pub chunk_count: usize,
    pub sample_chunks: Vec<SampleChunk>,
}

/// Outcome of an indexing run. `failed` lists documents that could not be
/// read or committed; documents upserted before a failure stay committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub docset: String,
    pub collection: String,
    pub indexed_files: usize,
    pub indexed_chunks: usize,
    pub files: Vec<FileReport>,
    pub failed: Vec<FailedFile>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<PreviewEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Index the queried docset from the configured docs root when it has no
    /// chunks yet, then retry the query once.
    #[serde(default = "default_true")]
    pub auto_index: bool,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    /// Payload filters: `field` for exact match (arrays mean any-of),
    /// `field__prefix` and `field__contains` for string post filters.
    #[serde(default)]
    pub filters: Option<serde_json::Map<String, Value>>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: default_top_k(),
            auto_index: true,
            snippet_chars: default_snippet_chars(),
            filters: None,
        }
    }
}

/// One fused result. `score` is the ranking value; the per-branch scores are
/// diagnostic and absent when the chunk was not a candidate in that branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    pub vector_score: Option<f32>,
    pub bm25_score: Option<f32>,
    pub source: String,
    pub text: String,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub hits: Vec<Hit>,
    pub fusion_method: String,
    pub auto_indexed: bool,
    pub elapsed_ms: u64,
    pub bm25_cache_docs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    pub method: String,
    pub alpha: f32,
    pub rrf_k: f32,
    pub vector_mult: usize,
    pub bm25_mult: usize,
    pub bm25_scroll_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub store_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub collection: String,
    pub points: usize,
    pub expected_vector_dim: usize,
    pub embedding_model: String,
    pub embeddings_configured: bool,
    pub bm25_cache_docs: usize,
    pub bm25_cold: bool,
    pub fusion: FusionSettings,
}

/// Hybrid retrieval engine over a vector store and an in-memory BM25 index.
pub struct HybridEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    lexical: RwLock<Bm25Index>,
    /// Collapses concurrent cold-start rebuilds into a single scroll.
    rebuild_lock: Mutex<()>,
    /// One writer at a time per docset; different docsets index in parallel.
    docset_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HybridEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            lexical: RwLock::new(Bm25Index::new()),
            rebuild_lock: Mutex::new(()),
            docset_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn docset_lock(&self, docset: &str) -> Arc<Mutex<()>> {
        let mut locks = self.docset_locks.lock().await;
        locks
            .entry(docset.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Chunk, embed and upsert every markdown/text document under the
    /// request's docs root. Documents committed before a provider or store
    /// failure stay committed; the remaining documents are reported as
    /// failed and the run stops.
    pub async fn index_docset(
        &self,
        req: &IndexRequest,
        progress: Option<&ProgressLogger>,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let options = ChunkOptions::from_env()?;

        let docset_lock = self.docset_lock(&req.docset).await;
        let _guard = docset_lock.lock().await;

        tracing::info!(
            "Indexing docset '{}' from {} (recreate={}, replace={})",
            req.docset,
            req.docs_root,
            req.recreate,
            req.replace_docset
        );

        let root = PathBuf::from(&req.docs_root);
        if !root.is_dir() {
            return Err(EngineError::configuration(format!(
                "docs_root not found: {}",
                req.docs_root
            )));
        }

        self.store
            .ensure_collection(self.embedder.dimension(), req.recreate)
            .await?;
        if req.recreate {
            self.lexical.write().await.clear();
        }

        let paths = discover_documents(&root, req.max_files).await?;
        let mut state = ProgressState::new(req.docset.clone(), paths.len() as i64);
        emit_progress(
            progress,
            &state,
            "discover",
            Some(&format!("{} documents", paths.len())),
        )
        .await;
        tracing::info!("Discovered {} documents under {}", paths.len(), req.docs_root);

        state.stage = Stage::Embed;

        let mut files: Vec<FileReport> = Vec::new();
        let mut failed: Vec<FailedFile> = Vec::new();
        let mut preview_entries: Vec<PreviewEntry> = Vec::new();
        let mut indexed_chunks = 0usize;
        // Old chunks are deleted right before the run's first upsert. A run
        // that fails before producing anything leaves the docset untouched,
        // and a recreate already dropped the whole collection.
        let mut needs_cleanup = req.replace_docset && !req.recreate;

        for path in &paths {
            let source = source_label(&root, path);
            state.last_doc = Some(source.clone());

            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Skipping unreadable document {}: {}", source, e);
                    failed.push(FailedFile {
                        source,
                        error: e.to_string(),
                    });
                    state.failed_docs += 1;
                    state.done_docs += 1;
                    emit_progress(progress, &state, "error", Some("read failed")).await;
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&bytes);

            let is_markdown = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            let pieces = if is_markdown {
                chunk_markdown(&text, &options)
            } else {
                chunk_plain(&text, &options)
            };

            if pieces.is_empty() {
                files.push(FileReport { source, chunks: 0 });
                state.success_docs += 1;
                state.done_docs += 1;
                emit_progress(progress, &state, "progress", Some("no chunks")).await;
                continue;
            }

            let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
            let vectors = match self.embed_document(&source, &texts, &state, progress).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    tracing::warn!("Embedding failed for {}: {}", source, e);
                    failed.push(FailedFile {
                        source,
                        error: e.to_string(),
                    });
                    state.failed_docs += 1;
                    state.done_docs += 1;
                    emit_progress(progress, &state, "error", Some("embedding failed")).await;
                    break;
                }
            };

            let mut records: Vec<ChunkRecord> = Vec::with_capacity(pieces.len());
            for (idx, (piece, vector)) in pieces.iter().zip(vectors).enumerate() {
                let heading_path = piece.heading_path.as_deref().unwrap_or("");
                let identity = chunk_identity(&req.docset, &source, heading_path, idx);
                records.push(ChunkRecord {
                    point_id: identity.point_id,
                    vector,
                    payload: ChunkPayload {
                        text: piece.text.clone(),
                        source: source.clone(),
                        docset: req.docset.clone(),
                        chunk_index: idx,
                        chunk_key: identity.chunk_key,
                        heading_path: piece.heading_path.clone(),
                    },
                });
            }

            if needs_cleanup {
                if let Err(e) = self.store.delete_docset(&req.docset).await {
                    failed.push(FailedFile {
                        source,
                        error: e.to_string(),
                    });
                    state.failed_docs += 1;
                    state.done_docs += 1;
                    emit_progress(progress, &state, "error", Some("replace cleanup failed")).await;
                    break;
                }
                self.lexical.write().await.remove_docset(&req.docset);
                needs_cleanup = false;
            }

            if let Err(e) = self.store.upsert(&records).await {
                tracing::warn!("Upsert failed for {}: {}", source, e);
                failed.push(FailedFile {
                    source,
                    error: e.to_string(),
                });
                state.failed_docs += 1;
                state.done_docs += 1;
                emit_progress(progress, &state, "error", Some("upsert failed")).await;
                break;
            }

            if req.preview && preview_entries.len() < req.preview_files {
                preview_entries.push(preview_entry(&source, &pieces, req));
            }

            let chunk_count = records.len();
            {
                let mut lexical = self.lexical.write().await;
                for record in records {
                    let ChunkRecord {
                        point_id, payload, ..
                    } = record;
                    lexical.add_chunk(&point_id, payload);
                }
            }

            indexed_chunks += chunk_count;
            files.push(FileReport {
                source,
                chunks: chunk_count,
            });
            state.success_docs += 1;
            state.done_docs += 1;
            state.chunks_done += chunk_count as i64;
            emit_progress(progress, &state, "progress", None).await;
        }

        // Documents after an aborting failure were never attempted; report
        // them so the caller can see exactly what is missing.
        let attempted = state.done_docs as usize;
        for path in paths.iter().skip(attempted) {
            failed.push(FailedFile {
                source: source_label(&root, path),
                error: "not attempted: run aborted by an earlier failure".to_string(),
            });
        }

        state.stage = Stage::Finalize;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        emit_progress(
            progress,
            &state,
            "done",
            Some(&format!("{} chunks", indexed_chunks)),
        )
        .await;
        tracing::info!(
            "Indexed docset '{}': {} files, {} chunks, {} failed in {}ms",
            req.docset,
            files.len(),
            indexed_chunks,
            failed.len(),
            elapsed_ms
        );

        Ok(IndexReport {
            docset: req.docset.clone(),
            collection: self.store.collection_name().to_string(),
            indexed_files: files.len(),
            indexed_chunks,
            files,
            failed,
            elapsed_ms,
            preview: req.preview.then_some(preview_entries),
        })
    }

    /// Embed one document's chunks in bounded batches with an optional
    /// cooldown between batches. A response with the wrong vector count is a
    /// provider fault.
    async fn embed_document(
        &self,
        source: &str,
        texts: &[String],
        state: &ProgressState,
        progress: Option<&ProgressLogger>,
    ) -> Result<Vec<Vec<f32>>> {
        let batch_size = config::get_embedding_batch_size().max(1);
        let cooldown_ms = config::get_embedding_batch_cooldown_ms();
        let batch_count = texts.len().div_ceil(batch_size);
        if batch_count > 1 {
            tracing::info!(
                "Embedding {} chunks from {} in {} batches of up to {}",
                texts.len(),
                source,
                batch_count,
                batch_size
            );
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(batch_size).enumerate() {
            let embedded = self.embedder.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(EngineError::provider(format!(
                    "embedding batch {}/{} returned {} vectors for {} inputs",
                    batch_index + 1,
                    batch_count,
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);

            if let Some(logger) = progress {
                let batch_progress = BatchProgress {
                    document_name: source.to_string(),
                    batch_index: batch_index + 1,
                    batch_count,
                    chunks_in_batch: batch.len(),
                    total_chunks: texts.len(),
                };
                if let Err(e) = logger.emit_batch(state, &batch_progress).await {
                    tracing::error!("Failed to write batch progress: {}", e);
                }
            }

            if cooldown_ms > 0 && batch_index + 1 < batch_count {
                tokio::time::sleep(Duration::from_millis(cooldown_ms)).await;
            }
        }
        Ok(vectors)
    }

    /// Run one hybrid query. Invalid filters are rejected before any
    /// provider or store call. When `auto_index` is set and the queried
    /// docset has no chunks, the configured docs root is indexed into it and
    /// the query retried once.
    pub async fn query(&self, req: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let expr = FilterExpr::parse_opt(req.filters.as_ref())?;

        let mut hits = self.hybrid_search(req, &expr).await?;
        let mut auto_indexed = false;

        if req.auto_index {
            let queried = expr
                .exact_value("docset")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(config::get_default_docset);
            match self.store.count(Some(&queried)).await {
                Ok(0) => {
                    let docs_root = config::get_docs_root();
                    tracing::info!(
                        "Docset '{}' has no chunks, indexing {} before one retry",
                        queried,
                        docs_root
                    );
                    match self
                        .index_docset(&IndexRequest::new(docs_root, queried), None)
                        .await
                    {
                        Ok(report) => {
                            tracing::info!(
                                "Auto-indexed {} chunks from {} files",
                                report.indexed_chunks,
                                report.indexed_files
                            );
                            auto_indexed = true;
                            hits = self.hybrid_search(req, &expr).await?;
                        }
                        Err(e) => {
                            tracing::warn!("Auto-indexing failed: {}", e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Auto-index count check skipped: {}", e);
                }
            }
        }

        let bm25_cache_docs = self.lexical.read().await.len();
        Ok(QueryResponse {
            query: req.query.clone(),
            hits,
            fusion_method: FusionMethod::from_name(&config::get_fusion_method())
                .as_str()
                .to_string(),
            auto_indexed,
            elapsed_ms: started.elapsed().as_millis() as u64,
            bm25_cache_docs,
        })
    }

    async fn hybrid_search(&self, req: &QueryRequest, expr: &FilterExpr) -> Result<Vec<Hit>> {
        let query_vector = self.embedder.embed_query(&req.query).await?;

        let vector_k = req.top_k.saturating_mul(config::get_vector_mult()).max(20);
        let bm25_k = req.top_k.saturating_mul(config::get_bm25_mult()).max(20);

        let pushdown = expr.pushdown();
        let vector_hits = self
            .store
            .search(
                &query_vector,
                vector_k,
                (!pushdown.is_empty()).then_some(&pushdown),
            )
            .await?;

        self.ensure_lexical_ready().await;

        // Both branches re-check the full expression with the same matcher,
        // so pushdown and post filters cannot disagree about a candidate.
        // Ranks are positions within each branch's filtered list.
        let mut vector_branch: Vec<(String, f32)> = Vec::with_capacity(vector_hits.len());
        let mut payloads: HashMap<String, ChunkPayload> = HashMap::new();
        for point in &vector_hits {
            if !expr.is_empty() && !point.payload.matches(expr) {
                continue;
            }
            vector_branch.push((point.id.clone(), point.score));
            payloads.insert(point.id.clone(), point.payload.clone());
        }

        let lexical_branch: Vec<(String, f32)> = {
            let lexical = self.lexical.read().await;
            let mut scored = lexical.score(&req.query, 0);
            if !expr.is_empty() {
                scored.retain(|(id, _)| {
                    lexical
                        .payload(id)
                        .map(|payload| payload.matches(expr))
                        .unwrap_or(false)
                });
            }
            scored.truncate(bm25_k);
            // The vector payload wins when both branches saw the chunk; the
            // lexical copy fills gaps and empty texts.
            for (id, _) in &scored {
                if let Some(payload) = lexical.payload(id) {
                    match payloads.get(id) {
                        Some(existing) if !existing.text.is_empty() => {}
                        _ => {
                            payloads.insert(id.clone(), payload.clone());
                        }
                    }
                }
            }
            scored
        };

        let method = FusionMethod::from_name(&config::get_fusion_method());
        let ranked = fusion::fuse(
            method,
            &vector_branch,
            &lexical_branch,
            config::get_rrf_k(),
            config::get_hybrid_alpha(),
        );

        let mut hits = Vec::with_capacity(req.top_k.min(ranked.len()));
        for (id, fused) in ranked.into_iter().take(req.top_k) {
            let payload = payloads.get(&id).cloned().unwrap_or_default();
            hits.push(Hit {
                id,
                score: fused.fused,
                vector_score: fused.vector_score,
                bm25_score: fused.bm25_score,
                source: payload.source.clone(),
                text: truncate_chars(&payload.text, req.snippet_chars),
                payload,
            });
        }
        Ok(hits)
    }

    /// Rebuild the lexical index from a store scroll when it is empty.
    /// Concurrent cold queries collapse onto one rebuild. A store failure
    /// leaves the index empty and the query proceeds on vector results
    /// alone.
    async fn ensure_lexical_ready(&self) {
        if !self.lexical.read().await.is_empty() {
            return;
        }
        let _flight = self.rebuild_lock.lock().await;
        if !self.lexical.read().await.is_empty() {
            return;
        }

        let limit = config::get_bm25_scroll_limit();
        match self.store.scroll(limit).await {
            Ok(points) => {
                let mut index = Bm25Index::new();
                for (id, payload) in points {
                    index.add_chunk(&id, payload);
                }
                let docs = index.len();
                // An indexing run may have filled the cache while the scroll
                // was in flight; its entries are newer than this snapshot.
                let mut lexical = self.lexical.write().await;
                if lexical.is_empty() {
                    *lexical = index;
                    if docs > 0 {
                        tracing::info!("Rebuilt lexical index from store scroll ({} chunks)", docs);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Lexical rebuild from store failed, continuing vector-only: {}",
                    e
                );
            }
        }
    }

    /// Operational snapshot. A down store makes the report degraded rather
    /// than an error, so health stays answerable while the stack is broken.
    pub async fn health(&self) -> HealthReport {
        let (store_ok, points, store_error) = match self.store.count(None).await {
            Ok(points) => (true, points, None),
            Err(e) => (false, 0, Some(e.to_string())),
        };
        let lexical = self.lexical.read().await;
        HealthReport {
            status: if store_ok { "ok" } else { "degraded" }.to_string(),
            store_ok,
            store_error,
            collection: self.store.collection_name().to_string(),
            points,
            expected_vector_dim: self.embedder.dimension(),
            embedding_model: self.embedder.model_name().to_string(),
            embeddings_configured: config::embeddings_configured(),
            bm25_cache_docs: lexical.len(),
            bm25_cold: lexical.is_empty(),
            fusion: FusionSettings {
                method: FusionMethod::from_name(&config::get_fusion_method())
                    .as_str()
                    .to_string(),
                alpha: config::get_hybrid_alpha(),
                rrf_k: config::get_rrf_k(),
                vector_mult: config::get_vector_mult(),
                bm25_mult: config::get_bm25_mult(),
                bm25_scroll_limit: config::get_bm25_scroll_limit(),
            },
        }
    }
}

/// Walk the docs root for markdown and plain-text files, sorted by path for
/// stable run order, truncated to `max_files`.
async fn discover_documents(root: &Path, max_files: usize) -> Result<Vec<PathBuf>> {
    let walk_root = root.to_path_buf();
    let mut paths = tokio::task::spawn_blocking(move || {
        WalkDir::new(&walk_root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| EngineError::configuration(format!("document discovery failed: {}", e)))?;
    paths.sort();
    paths.truncate(max_files);
    Ok(paths)
}

/// Store-facing name for a document: the docs root's directory name plus the
/// path below it, with forward slashes on every platform.
fn source_label(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = root.file_name().and_then(|n| n.to_str()) {
        parts.push(name.to_string());
    }
    for comp in rel.components() {
        parts.push(comp.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

fn preview_entry(source: &str, pieces: &[ChunkPiece], req: &IndexRequest) -> PreviewEntry {
    let sample_chunks = pieces
        .iter()
        .take(req.preview_chunks_per_file)
        .map(|piece| SampleChunk {
            chars: piece.text.chars().count(),
            preview: truncate_chars(&piece.text, req.preview_chars),
        })
        .collect();
    PreviewEntry {
        source: source.to_string(),
        chunk_count: pieces.len(),
        sample_chunks,
    }
}

/// Character-bounded copy with a trailing ellipsis when text was cut. Byte
/// slicing would split multi-byte characters.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

async fn emit_progress(
    progress: Option<&ProgressLogger>,
    state: &ProgressState,
    event: &str,
    note: Option<&str>,
) {
    if let Some(logger) = progress {
        if let Err(e) = logger.emit(state, event, note).await {
            tracing::error!("Failed to write progress event: {}", e);
        }
    }
}
