//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible `/embeddings` endpoints (Mistral, OpenAI, local gateways)
//! - A mock provider producing random vectors for local runs

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::retry::{RetryPolicy, Retryable};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, one vector per text in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Failure of a single provider call
#[derive(Debug, thiserror::Error)]
enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Malformed(String),
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            ProviderError::Malformed(_) => false,
        }
    }
}

/// OpenAI-compatible embedding client
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

const DEFAULT_API_BASE: &str = "https://api.mistral.ai/v1";

impl HttpEmbedder {
    /// Create a new embedder from configuration
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: format!("embedding.api_key is required for provider '{}'", config.provider),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            retry,
        })
    }

    async fn make_request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        // Providers may return items out of order when they carry an index.
        if result.data.iter().all(|d| d.index.is_some()) {
            result.data.sort_by_key(|d| d.index);
        }

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings.into_iter().next().ok_or_else(|| AppError::EmbeddingError {
            message: "Empty response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let started = std::time::Instant::now();
        let result = self
            .retry
            .run("embedding.embed_batch", |_| self.make_request(texts))
            .await;

        crate::metrics::record_embedding_request(&self.model, result.is_ok(), started.elapsed());

        result.map_err(|e| AppError::EmbeddingError {
            message: e.to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Ok((0..self.dimension).map(|_| rng.gen::<f32>()).collect())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" | "mistral" => Ok(Arc::new(HttpEmbedder::new(config, retry)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider '{}'", other),
        }),
    }
}
