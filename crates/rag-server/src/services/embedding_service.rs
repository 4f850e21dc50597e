use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LiteLlmConfig;
use crate::models::Usage;
use crate::utils::error::AppError;
use crate::utils::limiters::Limiters;
use crate::utils::retry::{with_retry, RetryPolicy};

/// Gateway batch cap; larger inputs are split and embedded in parallel.
const MAX_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub usage: Usage,
}

/// Embedding capability consumed by ingestion and retrieval.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, AppError>;

    fn dimension(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequestBody {
    model: String,
    input: Vec<String>,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseBody {
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI-compatible embedding gateway client.
pub struct EmbeddingClient {
    client: Client,
    config: LiteLlmConfig,
    dimension: usize,
    limiters: Arc<Limiters>,
    retry_policy: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(config: LiteLlmConfig, dimension: usize, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::new(),
            config,
            dimension,
            limiters,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// One gateway call for up to `MAX_BATCH_SIZE` texts. The server may
    /// return items in any order; they are re-sorted by `index`.
    async fn embed_one_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.embedding.clone(),
            self.limiters.acquire_timeout,
            "embedding",
        )
        .await?;
        debug!(wait_ms = wait.as_millis() as u64, op = "embedding", "wait_queue");

        let body = EmbeddingRequestBody {
            model: self.config.embedding_model.clone(),
            input: texts.to_vec(),
            encoding_format: "float",
        };
        let url = format!("{}/embeddings", self.config.base_url);
        let timeout = self.config.timeout;

        let response = with_retry(&self.retry_policy, "embed_batch", || {
            let send = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send();
            async move {
                let response = tokio::time::timeout(timeout, send)
                    .await
                    .map_err(|_| {
                        AppError::Timeout(format!("Embedding request timed out after {:?}", timeout))
                    })?
                    .map_err(AppError::from)?;

                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let detail = response.text().await.unwrap_or_default();
                    return Err(AppError::from_status(
                        status,
                        format!("Embedding API error: {}", detail),
                    ));
                }
                Ok(response)
            }
        })
        .await?;

        let parsed: EmbeddingResponseBody = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Embedding response parse error: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(AppError::Integrity(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimension {
                return Err(AppError::Integrity(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    item.embedding.len()
                )));
            }
            vectors.push(item.embedding);
        }

        Ok(EmbeddingBatch {
            vectors,
            model: parsed.model,
            usage: parsed.usage,
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                model: self.config.embedding_model.clone(),
                usage: Usage::default(),
            });
        }

        debug!(
            "Embedding {} texts in {} batches",
            texts.len(),
            texts.len().div_ceil(MAX_BATCH_SIZE)
        );

        let futures: Vec<_> = texts
            .chunks(MAX_BATCH_SIZE)
            .map(|batch| self.embed_one_batch(batch))
            .collect();

        let mut vectors = Vec::with_capacity(texts.len());
        let mut usage = Usage::default();
        let mut model = String::new();

        for result in join_all(futures).await {
            let batch = result?;
            vectors.extend(batch.vectors);
            usage.prompt_tokens += batch.usage.prompt_tokens;
            usage.total_tokens += batch.usage.total_tokens;
            if model.is_empty() {
                model = batch.model;
            }
        }

        Ok(EmbeddingBatch {
            vectors,
            model,
            usage,
        })
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Integrity("Embedding failed: empty response".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
