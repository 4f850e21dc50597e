pub mod grounding;
pub mod relevance;

use std::sync::Arc;
use tracing::debug;

use crate::config::VerificationConfig;
use crate::models::{ScoredChunk, SearchResult, VerificationResult};
use crate::services::llm_service::ChatCompleter;
use crate::utils::limiters::Limiters;

pub use grounding::GroundingVerifier;
pub use relevance::RelevanceFilter;

/// Output of the full verification pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub filtered_chunks: Vec<ScoredChunk>,
    pub verification: VerificationResult,
}

/// Relevance filtering + grounding verification. When disabled, returns
/// neutral verdicts without touching the LLM.
pub struct VerificationService {
    relevance: RelevanceFilter,
    grounding: GroundingVerifier,
    enabled: bool,
}

impl VerificationService {
    pub fn new(
        completer: Arc<dyn ChatCompleter>,
        limiters: Arc<Limiters>,
        config: &VerificationConfig,
        llm_timeout: std::time::Duration,
    ) -> Self {
        Self {
            relevance: RelevanceFilter::new(
                completer.clone(),
                limiters,
                config.relevance_threshold,
                config.cache_ttl,
            ),
            grounding: GroundingVerifier::new(
                completer,
                config.grounding_threshold,
                llm_timeout,
            ),
            enabled: config.enabled,
        }
    }

    fn passthrough_chunks(results: &[SearchResult]) -> Vec<ScoredChunk> {
        results
            .iter()
            .map(|result| ScoredChunk {
                result: result.clone(),
                relevance_score: result.score,
                explanation: None,
            })
            .collect()
    }

    /// Filter chunks by relevance, then verify the answer against the kept
    /// chunks.
    pub async fn run_pipeline(
        &self,
        question: &str,
        search_results: &[SearchResult],
        answer: &str,
    ) -> PipelineOutcome {
        if !self.enabled {
            return PipelineOutcome {
                filtered_chunks: Self::passthrough_chunks(search_results),
                verification: VerificationResult::neutral(),
            };
        }

        let filtered_chunks = self.relevance.filter(question, search_results).await;
        debug!(
            "Relevance filter kept {}/{} chunks",
            filtered_chunks.len(),
            search_results.len()
        );

        let verification = self
            .grounding
            .verify(question, answer, &filtered_chunks)
            .await;

        PipelineOutcome {
            filtered_chunks,
            verification,
        }
    }

    /// Grounding check without the relevance filtering stage.
    pub async fn quick_verify(
        &self,
        question: &str,
        answer: &str,
        search_results: &[SearchResult],
    ) -> VerificationResult {
        if !self.enabled {
            return VerificationResult::neutral();
        }

        let chunks = Self::passthrough_chunks(search_results);
        self.grounding.verify(question, answer, &chunks).await
    }
}
