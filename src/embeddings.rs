use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::config;
use crate::error::{EngineError, Result};
use crate::lexical::tokenize;

/// Gateway to whatever produces embedding vectors. Document indexing goes
/// through `embed_batch`; queries go through `embed_query` so implementations
/// can cache them.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
    /// Cheap reachability check, used for fail-fast startup.
    async fn probe(&self) -> Result<()>;
    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingRequest<'a> {
    Single { model: &'a str, input: &'a str },
    Batch { model: &'a str, input: &'a [String] },
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints with LRU
/// query caching. Works against OpenAI itself or any local server exposing
/// the same shape.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    query_cache: RwLock<LruCache<String, Vec<f32>>>,
}

impl HttpEmbeddingProvider {
    pub fn from_env() -> Result<Self> {
        let base_url = config::get_embeddings_url();
        let model = config::get_embedding_model();
        let dimension = config::get_embedding_dimension();

        tracing::info!("Embeddings URL: {}", base_url);
        tracing::info!("Embedding model: {} (dim {})", model, dimension);

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config::get_request_timeout_secs(),
            ))
            .build()
            .map_err(|e| EngineError::provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config::get_embeddings_api_key(),
            model,
            dimension,
            query_cache: RwLock::new(LruCache::new(NonZeroUsize::new(1000).unwrap())),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let cleaned = clean_text(text);
        let request = EmbeddingRequest::Single {
            model: &self.model,
            input: &cleaned,
        };
        let response = self
            .request("/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::provider(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::provider(format!(
                "Embeddings API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::provider(format!("invalid embedding response: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngineError::provider("no embedding returned"))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.len() == 1 {
            return Ok(vec![self.embed_one(&texts[0]).await?]);
        }

        let cleaned: Vec<String> = texts.iter().map(|t| clean_text(t)).collect();
        let request = EmbeddingRequest::Batch {
            model: &self.model,
            input: &cleaned,
        };

        // Hard timeout around the whole batch so a stalled provider cannot
        // hang an indexing run past the configured bound.
        let timeout_secs = config::get_request_timeout_secs();
        let request_future = self.request("/embeddings").json(&request).send();

        let response = match tokio::time::timeout(
            tokio::time::Duration::from_secs(timeout_secs),
            request_future,
        )
        .await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Err(EngineError::provider(format!(
                    "batch embedding request failed: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(EngineError::provider(format!(
                    "batch embedding timed out after {} seconds for {} texts",
                    timeout_secs,
                    texts.len()
                )))
            }
        };

        if !response.status().is_success() {
            return Err(EngineError::provider(format!(
                "Embeddings API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::provider(format!("invalid embedding response: {}", e)))?;
        let embeddings: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();

        if embeddings.len() == texts.len() {
            return Ok(embeddings);
        }

        // Some servers silently drop inputs from a batch. Retry one by one
        // so a partial response cannot misalign vectors with their chunks.
        tracing::warn!(
            "Batch embedding returned {} vectors for {} texts, falling back to sequential",
            embeddings.len(),
            texts.len()
        );
        let mut result = Vec::with_capacity(texts.len());
        for text in texts {
            result.push(self.embed_one(text).await?);
        }
        Ok(result)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.write().await.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.embed_one(text).await?;
        self.query_cache
            .write()
            .await
            .put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn probe(&self) -> Result<()> {
        let mut builder = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            EngineError::provider(format!(
                "cannot reach embeddings endpoint at {}: {}",
                self.base_url, e
            ))
        })?;

        if !response.status().is_success() {
            return Err(EngineError::provider(format!(
                "Embeddings API error: {} - {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        tracing::info!("Embeddings endpoint reachable at {}", self.base_url);
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// The provider convention: newlines are replaced with spaces before the
/// text is sent.
fn clean_text(text: &str) -> String {
    text.replace('\n', " ")
}

/// Deterministic offline embedder. Each token is hashed into one slot of the
/// vector and counts accumulate, then the vector is L2-normalized, so texts
/// sharing tokens land near each other under cosine. No network, no model;
/// meant for tests and embedded runs.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let slot = (u64::from_be_bytes(bytes) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_to_provider_shape() {
        let single = EmbeddingRequest::Single {
            model: "test-model",
            input: "hello",
        };
        assert_eq!(
            serde_json::to_value(&single).unwrap(),
            json!({"model": "test-model", "input": "hello"})
        );

        let inputs = vec!["a".to_string(), "b".to_string()];
        let batch = EmbeddingRequest::Batch {
            model: "test-model",
            input: &inputs,
        };
        assert_eq!(
            serde_json::to_value(&batch).unwrap(),
            json!({"model": "test-model", "input": ["a", "b"]})
        );
    }

    #[test]
    fn test_response_parses_provider_shape() {
        let raw = r#"{"data": [{"embedding": [0.1, 0.2]}, {"embedding": [0.3, 0.4]}], "model": "m"}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_clean_text_replaces_newlines() {
        assert_eq!(clean_text("line one\nline two"), "line one line two");
    }

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let a = HashEmbedder::new(64);
        let b = HashEmbedder::new(64);
        let text = "deterministic embedding input";

        let va = a.embed_text(text);
        let vb = b.embed_text(text);
        assert_eq!(va.len(), 64);
        assert_eq!(va, vb, "same text must map to the same vector");
    }

    #[test]
    fn test_hash_embedder_normalizes_and_overlaps_on_shared_tokens() {
        let embedder = HashEmbedder::new(64);
        let va = embedder.embed_text("rust ownership rules");
        let vb = embedder.embed_text("rust borrowing rules");

        let norm: f32 = va.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "vectors should be unit length");

        // Slots are non-negative counts, so shared tokens guarantee a
        // positive dot product.
        let dot: f32 = va.iter().zip(&vb).map(|(x, y)| x * y).sum();
        assert!(dot > 0.0);
    }

    #[test]
    fn test_hash_embedder_token_free_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed_text("a b -- !");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
