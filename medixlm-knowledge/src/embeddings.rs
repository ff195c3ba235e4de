use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::KnowledgeSettings;
use crate::errors::{KnowledgeError, KnowledgeResult};

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Dimensionality of every vector this provider returns.
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> KnowledgeResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| KnowledgeError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>>;
}

/// Ollama-style `/api/embed` client.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(settings: &KnowledgeSettings) -> KnowledgeResult<Self> {
        let client = reqwest::Client::builder().timeout(EMBED_TIMEOUT).build()?;
        Ok(Self {
            base_url: settings.embedding_url.trim_end_matches('/').to_string(),
            model: settings.embedding_model.clone(),
            dims: settings.embedding_dim,
            batch_size: settings.embedding_batch.max(1),
            client,
        })
    }

    async fn embed_chunk(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Embedding(format!(
                "embedding request failed: {status} {text}"
            )));
        }

        let payload: EmbedResponse = response.json().await?;

        let embeddings = match (payload.embeddings, payload.embedding) {
            (Some(embeddings), _) => embeddings,
            (None, Some(embedding)) => vec![embedding],
            (None, None) => {
                return Err(KnowledgeError::Embedding(
                    "embedding response missing vectors".to_string(),
                ));
            }
        };

        if embeddings.len() != inputs.len() {
            return Err(KnowledgeError::Embedding(format!(
                "expected {} vectors, got {}",
                inputs.len(),
                embeddings.len()
            )));
        }
        for vector in &embeddings {
            check_dims(self.dims, vector)?;
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            debug!(model = %self.model, count = chunk.len(), "embedding batch");
            out.extend(self.embed_chunk(chunk).await?);
        }
        Ok(out)
    }
}

/// Verify a vector has the configured dimensionality.
pub fn check_dims(expected: usize, vector: &[f32]) -> KnowledgeResult<()> {
    if vector.len() != expected {
        return Err(KnowledgeError::EmbeddingDimMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Deterministic offline embedder.
///
/// Hashes lowercase alphanumeric tokens (FNV-1a) into a fixed number of
/// buckets and L2-normalizes the result, so texts sharing words land close
/// together under cosine similarity. Used for local development and tests
/// when no embedding service is reachable.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Clone, serde::Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Option<Vec<Vec<f32>>>,
    embedding: Option<Vec<f32>>,
}
