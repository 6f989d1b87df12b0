use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::Digest;

use super::error::EmbeddingError;

/// Timeout applied to every embedding request unless overridden.
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces fixed-dimension vectors for text.
///
/// The store only ever talks to this trait; whether a provider exists at all
/// decides if semantic search runs.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch. Returns one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Release provider resources.
    fn close(&self) -> Result<(), EmbeddingError>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

/// Client for a text-embeddings-inference style service (`POST /embed`).
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmbeddingClient {
    /// Build a client for `endpoint`. Fails without touching the network when
    /// the endpoint is blank. `timeout` of `None` uses
    /// [`DEFAULT_EMBEDDING_TIMEOUT`].
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self, EmbeddingError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(EmbeddingError::MissingEndpoint);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_EMBEDDING_TIMEOUT))
            .build()
            .map_err(EmbeddingError::Client)?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.into_iter().next().ok_or(EmbeddingError::EmptyResponse)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embed", self.endpoint);
        // Truncate so one overlong description degrades instead of failing
        // the whole batch.
        let body = EmbedRequest {
            inputs: texts,
            truncate: true,
        };

        tracing::debug!(inputs = texts.len(), %url, "requesting embeddings");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(EmbeddingError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let vectors: Vec<Vec<f32>> = resp.json().await.map_err(EmbeddingError::Decode)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }

        Ok(vectors)
    }

    fn close(&self) -> Result<(), EmbeddingError> {
        // reqwest releases pooled connections on drop.
        Ok(())
    }
}

/// Deterministic embeddings without a model, for tests and local runs.
///
/// The SHA-256 of the text seeds a private generator, which fills a vector of
/// the configured dimension; the result is L2-normalized. The same text
/// always yields the same unit vector.
#[derive(Debug, Clone)]
pub struct FakeEmbeddingClient {
    dimension: usize,
}

impl FakeEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut rng = StdRng::from_seed(text_seed(text));
        let mut vec: Vec<f32> = (0..self.dimension)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();

        let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

fn text_seed(text: &str) -> [u8; 32] {
    let digest = sha2::Sha256::digest(text.as_bytes());
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&digest);
    seed
}

#[async_trait]
impl EmbeddingClient for FakeEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn close(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}
