//! Vector store adapter: the durable side of the engine.
//!
//! `QdrantStore` talks to a qdrant server over its REST API. `MemoryStore`
//! keeps everything in a HashMap and evaluates filters with the same
//! interpreter the engine's post-filter uses, so tests exercise identical
//! filter semantics without a running server.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config;
use crate::error::{EngineError, Result};
use crate::filters::{FilterExpr, MatchOp};

/// Payload stored with every point. Fields default so points written by
/// older runs still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub docset: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub chunk_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_path: Option<String>,
}

impl ChunkPayload {
    /// Evaluate a filter expression against this payload. Delegates to the
    /// interpreter in `filters` so every code path filters identically.
    pub fn matches(&self, expr: &FilterExpr) -> bool {
        match serde_json::to_value(self) {
            Ok(value) => expr.matches(&value),
            Err(_) => false,
        }
    }
}

/// The upsert unit: identity, vector, payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub point_id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing and verify its vector size matches
    /// `dim`. `recreate` drops any existing data first.
    async fn ensure_collection(&self, dim: usize, recreate: bool) -> Result<()>;
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()>;
    /// Ranked nearest neighbours. `filter` is the pushdown subset; clauses
    /// the store cannot evaluate are re-applied by the caller.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<ScoredPoint>>;
    async fn delete_docset(&self, docset: &str) -> Result<()>;
    /// Up to `limit` points with payloads, for lexical index rebuilds.
    async fn scroll(&self, limit: usize) -> Result<Vec<(String, ChunkPayload)>>;
    async fn count(&self, docset: Option<&str>) -> Result<usize>;
    fn collection_name(&self) -> &str;
}

/// Render the store-evaluable clauses as a qdrant filter body. Prefix and
/// contains clauses are left out; the engine applies them after retrieval.
fn qdrant_filter(expr: &FilterExpr) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();
    for clause in &expr.clauses {
        match &clause.op {
            MatchOp::Exact(v) => {
                must.push(json!({"key": clause.field, "match": {"value": v}}));
            }
            MatchOp::OneOf(vs) => {
                must.push(json!({"key": clause.field, "match": {"any": vs}}));
            }
            MatchOp::Prefix(_) | MatchOp::Contains(_) => {}
        }
    }
    if must.is_empty() {
        None
    } else {
        Some(json!({"must": must}))
    }
}

fn docset_filter(docset: &str) -> Value {
    json!({"must": [{"key": "docset", "match": {"value": docset}}]})
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct QdrantEnvelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct RawScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<ChunkPayload>,
}

#[derive(Deserialize)]
struct RawScrollPoint {
    id: Value,
    #[serde(default)]
    payload: Option<ChunkPayload>,
}

#[derive(Deserialize)]
struct RawScrollResult {
    points: Vec<RawScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

/// Qdrant REST adapter. Collections use cosine distance and unnamed vectors.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl QdrantStore {
    pub fn from_env() -> Result<Self> {
        let base_url = config::get_qdrant_url();
        let collection = config::get_qdrant_collection();

        tracing::info!("Qdrant URL: {} (collection '{}')", base_url, collection);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config::get_request_timeout_secs(),
            ))
            .build()
            .map_err(|e| EngineError::store(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::store(format!("Qdrant {} request failed: {}", what, e)))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(EngineError::store(format!(
            "Qdrant API error ({}): {} - {}",
            what, status, body
        )))
    }

    async fn create_collection(&self, dim: usize) -> Result<()> {
        let body = json!({"vectors": {"size": dim, "distance": "Cosine"}});
        self.send(
            self.client.put(self.collection_url()).json(&body),
            "create collection",
        )
        .await?;
        tracing::info!(
            "Created collection '{}' with vector size {}",
            self.collection,
            dim
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, dim: usize, recreate: bool) -> Result<()> {
        if recreate {
            let response = self
                .client
                .delete(self.collection_url())
                .send()
                .await
                .map_err(|e| {
                    EngineError::store(format!("Qdrant delete collection request failed: {}", e))
                })?;
            if !response.status().is_success()
                && response.status() != reqwest::StatusCode::NOT_FOUND
            {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(EngineError::store(format!(
                    "Qdrant API error (delete collection): {} - {}",
                    status, body
                )));
            }
            return self.create_collection(dim).await;
        }

        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|e| EngineError::store(format!("Qdrant get collection request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return self.create_collection(dim).await;
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::store(format!(
                "Qdrant API error (get collection): {} - {}",
                status, body
            )));
        }

        // Validate the stored vector size to avoid confusing 400s later.
        let info: Value = response
            .json()
            .await
            .map_err(|e| EngineError::store(format!("invalid collection info: {}", e)))?;
        if let Some(size) = info
            .pointer("/result/config/params/vectors/size")
            .and_then(|v| v.as_u64())
        {
            if size as usize != dim {
                return Err(EngineError::store(format!(
                    "collection '{}' vector size mismatch: expected {}, got {}. \
                     Recreate the collection or align EMBEDDING_DIMENSION",
                    self.collection, dim, size
                )));
            }
        }
        Ok(())
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points: Vec<Value> = records
            .iter()
            .map(|r| json!({"id": r.point_id, "vector": r.vector, "payload": r.payload}))
            .collect();
        let url = format!("{}/points?wait=true", self.collection_url());
        self.send(
            self.client.put(url).json(&json!({"points": points})),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<ScoredPoint>> {
        let mut body = json!({"vector": vector, "limit": limit, "with_payload": true});
        if let Some(f) = filter.and_then(qdrant_filter) {
            body["filter"] = f;
        }
        let url = format!("{}/points/search", self.collection_url());
        let response = self.send(self.client.post(url).json(&body), "search").await?;
        let parsed: QdrantEnvelope<Vec<RawScoredPoint>> = response
            .json()
            .await
            .map_err(|e| EngineError::store(format!("invalid search response: {}", e)))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                id: id_to_string(&p.id),
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_docset(&self, docset: &str) -> Result<()> {
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        let body = json!({"filter": docset_filter(docset)});
        self.send(self.client.post(url).json(&body), "delete by filter")
            .await?;
        tracing::info!("Deleted docset '{}' from '{}'", docset, self.collection);
        Ok(())
    }

    async fn scroll(&self, limit: usize) -> Result<Vec<(String, ChunkPayload)>> {
        let url = format!("{}/points/scroll", self.collection_url());
        let mut out: Vec<(String, ChunkPayload)> = Vec::new();
        let mut offset: Option<Value> = None;

        while out.len() < limit {
            let page = std::cmp::min(256, limit - out.len());
            let mut body = json!({"limit": page, "with_payload": true, "with_vector": false});
            if let Some(o) = &offset {
                body["offset"] = o.clone();
            }

            let response = self
                .send(self.client.post(&url).json(&body), "scroll")
                .await?;
            let parsed: QdrantEnvelope<RawScrollResult> = response
                .json()
                .await
                .map_err(|e| EngineError::store(format!("invalid scroll response: {}", e)))?;

            if parsed.result.points.is_empty() {
                break;
            }
            for point in parsed.result.points {
                out.push((id_to_string(&point.id), point.payload.unwrap_or_default()));
                if out.len() >= limit {
                    break;
                }
            }
            match parsed.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn count(&self, docset: Option<&str>) -> Result<usize> {
        let url = format!("{}/points/count", self.collection_url());
        let mut body = json!({"exact": true});
        if let Some(d) = docset {
            body["filter"] = docset_filter(d);
        }
        let response = self.send(self.client.post(url).json(&body), "count").await?;
        let parsed: QdrantEnvelope<CountResult> = response
            .json()
            .await
            .map_err(|e| EngineError::store(format!("invalid count response: {}", e)))?;
        Ok(parsed.result.count)
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, ChunkRecord>,
    dimension: Option<usize>,
}

/// In-process store with the trait's full semantics: cosine search, filter
/// application, docset delete, scroll, exact count.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, dim: usize, recreate: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if recreate {
            inner.records.clear();
            inner.dimension = Some(dim);
            return Ok(());
        }
        match inner.dimension {
            Some(existing) if existing != dim => Err(EngineError::store(format!(
                "collection 'memory' vector size mismatch: expected {}, got {}",
                dim, existing
            ))),
            _ => {
                inner.dimension = Some(dim);
                Ok(())
            }
        }
    }

    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(dim) = inner.dimension {
            for record in records {
                if record.vector.len() != dim {
                    return Err(EngineError::store(format!(
                        "point {} has vector size {}, collection expects {}",
                        record.point_id,
                        record.vector.len(),
                        dim
                    )));
                }
            }
        }
        for record in records {
            inner
                .records
                .insert(record.point_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&FilterExpr>,
    ) -> Result<Vec<ScoredPoint>> {
        let inner = self.inner.lock().await;
        let mut hits: Vec<ScoredPoint> = inner
            .records
            .values()
            .filter(|r| filter.map(|f| r.payload.matches(f)).unwrap_or(true))
            .map(|r| ScoredPoint {
                id: r.point_id.clone(),
                score: cosine(vector, &r.vector),
                payload: r.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_docset(&self, docset: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.records.retain(|_, r| r.payload.docset != docset);
        Ok(())
    }

    async fn scroll(&self, limit: usize) -> Result<Vec<(String, ChunkPayload)>> {
        let inner = self.inner.lock().await;
        let mut out: Vec<(String, ChunkPayload)> = inner
            .records
            .values()
            .map(|r| (r.point_id.clone(), r.payload.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.truncate(limit);
        Ok(out)
    }

    async fn count(&self, docset: Option<&str>) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(match docset {
            Some(d) => inner
                .records
                .values()
                .filter(|r| r.payload.docset == d)
                .count(),
            None => inner.records.len(),
        })
    }

    fn collection_name(&self) -> &str {
        "memory"
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, docset: &str, source: &str, chunk_index: usize, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            point_id: id.to_string(),
            vector,
            payload: ChunkPayload {
                text: format!("text for {}", id),
                source: source.to_string(),
                docset: docset.to_string(),
                chunk_index,
                chunk_key: format!("ch_{}", id),
                heading_path: None,
            },
        }
    }

    fn expr(v: serde_json::Value) -> FilterExpr {
        FilterExpr::parse(v.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0, "length mismatch scores zero");
    }

    #[test]
    fn test_qdrant_filter_renders_only_store_evaluable_clauses() {
        let e = expr(serde_json::json!({
            "docset": "docs",
            "lang": ["en", "ko"],
            "source__prefix": "guide/"
        }));
        let rendered = qdrant_filter(&e).unwrap();
        assert_eq!(
            rendered,
            serde_json::json!({"must": [
                {"key": "docset", "match": {"value": "docs"}},
                {"key": "lang", "match": {"any": ["en", "ko"]}}
            ]})
        );
    }

    #[test]
    fn test_qdrant_filter_empty_for_post_only_expressions() {
        let e = expr(serde_json::json!({"source__contains": "install"}));
        assert!(qdrant_filter(&e).is_none());
    }

    #[test]
    fn test_payload_skips_missing_heading_path_in_json() {
        let payload = ChunkPayload {
            text: "t".into(),
            source: "s.md".into(),
            docset: "docs".into(),
            chunk_index: 0,
            chunk_key: "ch_x".into(),
            heading_path: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("heading_path").is_none());
    }

    #[tokio::test]
    async fn test_memory_store_search_ranks_by_cosine() {
        let store = MemoryStore::new();
        store.ensure_collection(2, false).await.unwrap();
        store
            .upsert(&[
                record("a", "docs", "a.md", 0, vec![1.0, 0.0]),
                record("b", "docs", "b.md", 0, vec![0.0, 1.0]),
                record("c", "docs", "c.md", 0, vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 10, None).await.unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_memory_store_search_applies_filter() {
        let store = MemoryStore::new();
        store.ensure_collection(2, false).await.unwrap();
        store
            .upsert(&[
                record("a", "docs", "a.md", 0, vec![1.0, 0.0]),
                record("b", "notes", "b.md", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let f = expr(serde_json::json!({"docset": "notes"}));
        let hits = store.search(&[1.0, 0.0], 10, Some(&f)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_memory_store_upsert_overwrites_same_id() {
        let store = MemoryStore::new();
        store.ensure_collection(2, false).await.unwrap();
        store
            .upsert(&[record("a", "docs", "a.md", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(&[record("a", "docs", "renamed.md", 0, vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.count(None).await.unwrap(), 1);
        let points = store.scroll(10).await.unwrap();
        assert_eq!(points[0].1.source, "renamed.md");
    }

    #[tokio::test]
    async fn test_memory_store_delete_docset_and_count() {
        let store = MemoryStore::new();
        store.ensure_collection(2, false).await.unwrap();
        store
            .upsert(&[
                record("a", "docs", "a.md", 0, vec![1.0, 0.0]),
                record("b", "docs", "b.md", 0, vec![0.0, 1.0]),
                record("c", "notes", "c.md", 0, vec![0.5, 0.5]),
            ])
            .await
            .unwrap();

        assert_eq!(store.count(Some("docs")).await.unwrap(), 2);
        store.delete_docset("docs").await.unwrap();
        assert_eq!(store.count(Some("docs")).await.unwrap(), 0);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_recreate_clears_data() {
        let store = MemoryStore::new();
        store.ensure_collection(2, false).await.unwrap();
        store
            .upsert(&[record("a", "docs", "a.md", 0, vec![1.0, 0.0])])
            .await
            .unwrap();

        store.ensure_collection(2, true).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_dimension_mismatch() {
        let store = MemoryStore::new();
        store.ensure_collection(2, false).await.unwrap();

        assert!(store.ensure_collection(3, false).await.is_err());
        let result = store
            .upsert(&[record("a", "docs", "a.md", 0, vec![1.0, 0.0, 0.0])])
            .await;
        assert!(result.is_err(), "wrong-size vector must be rejected");
    }

    #[tokio::test]
    async fn test_memory_store_scroll_is_sorted_and_bounded() {
        let store = MemoryStore::new();
        store.ensure_collection(1, false).await.unwrap();
        store
            .upsert(&[
                record("c", "docs", "c.md", 0, vec![1.0]),
                record("a", "docs", "a.md", 0, vec![1.0]),
                record("b", "docs", "b.md", 0, vec![1.0]),
            ])
            .await
            .unwrap();

        let points = store.scroll(2).await.unwrap();
        let ids: Vec<&str> = points.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
