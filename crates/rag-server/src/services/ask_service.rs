use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::llm_service::{ChatCompleter, CompletionRequest};
use super::search_service::{SearchRequest, SearchService};
use super::verification::VerificationService;
use crate::database::{NewQueryLog, QueryType, Repository};
use crate::models::{SearchFilters, SearchResult, Usage, VerificationResult};
use crate::utils::error::AppError;
use crate::utils::token_estimator::estimate_tokens;

/// Context budget for the assembled prompt; whole chunks are dropped when
/// it runs out.
const MAX_CONTEXT_TOKENS: usize = 4_000;

const ASK_SYSTEM_PROMPT: &str = "You answer questions using only the provided document excerpts. \
Cite the source filename when you use an excerpt. If the excerpts do not contain the answer, \
say so plainly instead of guessing.";

#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub model: Option<String>,
    pub rerank: Option<bool>,
    pub verify: bool,
    pub expand: Option<bool>,
    pub hyde: Option<bool>,
    pub filters: Option<SearchFilters>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            limit: None,
            threshold: None,
            model: None,
            rerank: Some(true),
            verify: false,
            expand: None,
            hyde: None,
            filters: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AskMetadata {
    pub rerank_used: bool,
    pub hyde_used: bool,
    pub query_expanded: bool,
    pub original_query: String,
    pub context_truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub model: String,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Grounding score when verification ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub metadata: AskMetadata,
}

/// Ask coordinator: retrieval -> prompt assembly -> LLM -> optional
/// verification.
pub struct AskService {
    search_service: Arc<SearchService>,
    completer: Arc<dyn ChatCompleter>,
    verification: Arc<VerificationService>,
    repository: Arc<Repository>,
}

impl AskService {
    pub fn new(
        search_service: Arc<SearchService>,
        completer: Arc<dyn ChatCompleter>,
        verification: Arc<VerificationService>,
        repository: Arc<Repository>,
    ) -> Self {
        Self {
            search_service,
            completer,
            verification,
            repository,
        }
    }

    /// Build the context block under the token budget; chunks are dropped
    /// whole, never split.
    fn assemble_context(sources: &[SearchResult]) -> (String, bool) {
        let mut context = String::new();
        let mut tokens = 0usize;
        let mut truncated = false;

        for source in sources {
            let mut block = String::new();
            let _ = writeln!(block, "[source: {}]", source.filename);
            block.push_str(source.content.trim());
            block.push_str("\n\n");

            let block_tokens = estimate_tokens(&block);
            if tokens + block_tokens > MAX_CONTEXT_TOKENS {
                truncated = true;
                break;
            }
            context.push_str(&block);
            tokens += block_tokens;
        }

        (context.trim_end().to_string(), truncated)
    }

    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse, AppError> {
        let started = Instant::now();
        let question = request.question.trim().to_string();
        if question.is_empty() {
            return Err(AppError::Validation("Question must not be empty".to_string()));
        }

        let outcome = self
            .search_service
            .search(SearchRequest {
                query: question.clone(),
                limit: Some(request.limit.unwrap_or(5)),
                threshold: request.threshold,
                rerank: request.rerank,
                expand: request.expand,
                hyde: request.hyde,
                filters: request.filters.clone(),
            })
            .await?;

        let (context, context_truncated) = Self::assemble_context(&outcome.results);
        debug!(
            "Assembled context from {} sources (truncated={})",
            outcome.results.len(),
            context_truncated
        );

        let prompt = if context.is_empty() {
            format!(
                "No document excerpts matched the question.\n\nQuestion: {}",
                question
            )
        } else {
            format!(
                "Document excerpts:\n\n{}\n\nQuestion: {}",
                context, question
            )
        };

        let completion = self
            .completer
            .complete(
                CompletionRequest::new(prompt)
                    .with_system(ASK_SYSTEM_PROMPT)
                    .with_model(request.model.clone()),
            )
            .await?;

        let (verification, confidence) = if request.verify {
            let pipeline = self
                .verification
                .run_pipeline(&question, &outcome.results, &completion.content)
                .await;
            let confidence = pipeline.verification.grounding_score;
            (Some(pipeline.verification), Some(confidence))
        } else {
            (None, None)
        };

        self.log_query(&question, &outcome.results, started).await;

        info!(
            "Answered question with {} sources in {} ms",
            outcome.results.len(),
            started.elapsed().as_millis()
        );

        Ok(AskResponse {
            answer: completion.content,
            sources: outcome.results,
            model: completion.model,
            usage: completion.usage,
            verification,
            confidence,
            metadata: AskMetadata {
                rerank_used: outcome.rerank_used,
                hyde_used: outcome.hyde_used,
                query_expanded: outcome.query_expanded,
                original_query: outcome.original_query,
                context_truncated,
            },
        })
    }

    async fn log_query(&self, question: &str, sources: &[SearchResult], started: Instant) {
        let log = NewQueryLog {
            query: question.to_string(),
            query_type: QueryType::Ask,
            source: None,
            result_count: sources.len() as i64,
            top_score: sources.first().map(|s| s.score),
            latency_ms: started.elapsed().as_millis() as i64,
            metadata: None,
        };
        if let Err(err) = self.repository.insert_query_log(&log).await {
            warn!("Failed to write query log: {}", err);
        }
    }
}
