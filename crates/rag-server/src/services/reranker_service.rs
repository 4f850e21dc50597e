use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LiteLlmConfig;
use crate::utils::error::AppError;
use crate::utils::retry::{with_retry, RetryPolicy};

/// Sentinel score meaning "not produced by the cross-encoder": used both
/// for the short-circuit (fewer candidates than top_n) and for the failure
/// fallback. Callers distinguish reranked output by `score >= 0`.
pub const NOT_RERANKED: f32 = -1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RerankResult {
    /// Index into the candidate list handed to `rerank`.
    pub index: usize,
    pub relevance_score: f32,
}

/// Cross-encoder capability.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns candidate indices in relevance order, at most `top_n` of
    /// them. Never fails: on gateway errors the original order is returned
    /// with the sentinel score.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Vec<RerankResult>;
}

#[derive(Debug, Serialize)]
struct RerankRequestBody<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponseBody {
    results: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f32,
}

pub struct RerankClient {
    client: Client,
    config: LiteLlmConfig,
    retry_policy: RetryPolicy,
}

impl RerankClient {
    pub fn new(config: LiteLlmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            // Two attempts, 0.5 s initial backoff capped at 5 s
            retry_policy: RetryPolicy::new(1, Duration::from_millis(500), Duration::from_secs(5)),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn passthrough(documents: &[String], top_n: usize) -> Vec<RerankResult> {
        (0..documents.len().min(top_n))
            .map(|index| RerankResult {
                index,
                relevance_score: NOT_RERANKED,
            })
            .collect()
    }

    async fn call_gateway(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>, AppError> {
        let url = format!("{}/rerank", self.config.base_url);
        let body = RerankRequestBody {
            model: &self.config.reranker_model,
            query,
            documents,
            top_n,
        };
        let timeout = self.config.timeout;

        let response = with_retry(&self.retry_policy, "rerank", || {
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
                        AppError::Timeout(format!("Rerank request timed out after {:?}", timeout))
                    })?
                    .map_err(AppError::from)?;

                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let detail = response.text().await.unwrap_or_default();
                    return Err(AppError::from_status(
                        status,
                        format!("Rerank API error: {}", detail),
                    ));
                }
                Ok(response)
            }
        })
        .await?;

        let parsed: RerankResponseBody = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("Rerank response parse error: {}", e)))?;

        let mut results: Vec<RerankResult> = parsed
            .results
            .into_iter()
            .filter(|item| item.index < documents.len())
            .map(|item| RerankResult {
                index: item.index,
                relevance_score: item.relevance_score,
            })
            .collect();

        results.truncate(top_n);
        Ok(results)
    }
}

#[async_trait]
impl Reranker for RerankClient {
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> Vec<RerankResult> {
        if documents.is_empty() || top_n == 0 {
            return Vec::new();
        }

        // Nothing to narrow: keep the ANN order
        if documents.len() <= top_n {
            debug!(
                "Rerank short-circuit: {} candidates <= top_n {}",
                documents.len(),
                top_n
            );
            return Self::passthrough(documents, top_n);
        }

        match self.call_gateway(query, documents, top_n).await {
            Ok(results) if !results.is_empty() => results,
            Ok(_) => {
                warn!("Rerank gateway returned no results, falling back to original order");
                Self::passthrough(documents, top_n)
            }
            Err(err) => {
                warn!("Rerank failed, falling back to original order: {}", err);
                Self::passthrough(documents, top_n)
            }
        }
    }
}
