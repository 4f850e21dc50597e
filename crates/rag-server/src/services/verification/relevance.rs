use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::models::{ScoredChunk, SearchResult};
use crate::services::llm_service::{ChatCompleter, CompletionRequest};
use crate::utils::limiters::Limiters;
use crate::utils::lru::LruCache;

const CACHE_CAPACITY: usize = 1000;
const QUESTION_PREFIX_LEN: usize = 100;

static NUMERIC_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:0?\.\d+|[01](?:\.\d+)?)").unwrap());

const SCORING_SYSTEM_PROMPT: &str = "You judge whether a text chunk is relevant to a question. \
Respond with JSON only: {\"score\": <0..1>, \"explanation\": \"<one sentence>\"}";

#[derive(Debug, Deserialize)]
struct ScoreReply {
    score: f32,
    #[serde(default)]
    explanation: Option<String>,
}

#[derive(Clone)]
struct CachedScore {
    score: f32,
    explanation: Option<String>,
    at: Instant,
}

/// Scores chunk relevance with the LLM, bounded by the relevance limiter,
/// caching results per (question prefix, chunk) for a TTL.
pub struct RelevanceFilter {
    completer: Arc<dyn ChatCompleter>,
    limiters: Arc<Limiters>,
    cache: LruCache<u64, CachedScore>,
    threshold: f32,
    cache_ttl: Duration,
}

impl RelevanceFilter {
    pub fn new(
        completer: Arc<dyn ChatCompleter>,
        limiters: Arc<Limiters>,
        threshold: f32,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            completer,
            limiters,
            cache: LruCache::new(CACHE_CAPACITY),
            threshold,
            cache_ttl,
        }
    }

    fn cache_key(question: &str, result: &SearchResult) -> u64 {
        let prefix: String = question.chars().take(QUESTION_PREFIX_LEN).collect();
        let mut hasher = DefaultHasher::new();
        prefix.hash(&mut hasher);
        result.chunk_id.hash(&mut hasher);
        hasher.finish()
    }

    /// Parse the LLM reply; falls back to the first numeric token, then to
    /// the vector similarity score.
    fn parse_score(content: &str, fallback: f32) -> (f32, Option<String>) {
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        if let Ok(reply) = serde_json::from_str::<ScoreReply>(trimmed) {
            return (reply.score.clamp(0.0, 1.0), reply.explanation);
        }

        if let Some(m) = NUMERIC_TOKEN.find(trimmed) {
            if let Ok(score) = m.as_str().parse::<f32>() {
                return (score.clamp(0.0, 1.0), None);
            }
        }

        debug!("Relevance reply unparseable, using similarity score");
        (fallback.clamp(0.0, 1.0), None)
    }

    async fn score_one(&self, question: &str, result: &SearchResult) -> ScoredChunk {
        let key = Self::cache_key(question, result);
        if let Some(cached) = self.cache.get(&key) {
            if cached.at.elapsed() < self.cache_ttl {
                return ScoredChunk {
                    result: result.clone(),
                    relevance_score: cached.score,
                    explanation: cached.explanation,
                };
            }
            self.cache.remove(&key);
        }

        let permit = Limiters::acquire_timed(
            self.limiters.relevance.clone(),
            self.limiters.acquire_timeout,
            "relevance",
        )
        .await;

        let (score, explanation) = match permit {
            Ok((_permit, _)) => {
                let request = CompletionRequest::new(format!(
                    "Question: {}\n\nChunk:\n{}\n\nHow relevant is this chunk to the question?",
                    question, result.content
                ))
                .with_system(SCORING_SYSTEM_PROMPT)
                .with_sampling(0.1, 200);

                match self.completer.complete(request).await {
                    Ok(completion) => Self::parse_score(&completion.content, result.score),
                    Err(err) => {
                        warn!("Relevance scoring failed, using similarity: {}", err);
                        (result.score.clamp(0.0, 1.0), None)
                    }
                }
            }
            Err(err) => {
                warn!("Relevance limiter unavailable, using similarity: {}", err);
                (result.score.clamp(0.0, 1.0), None)
            }
        };

        self.cache.set(
            key,
            CachedScore {
                score,
                explanation: explanation.clone(),
                at: Instant::now(),
            },
        );

        ScoredChunk {
            result: result.clone(),
            relevance_score: score,
            explanation,
        }
    }

    /// Score all chunks in parallel (bounded by the relevance limiter),
    /// drop those under the threshold, sort the rest by score descending.
    pub async fn filter(&self, question: &str, results: &[SearchResult]) -> Vec<ScoredChunk> {
        if results.is_empty() {
            return Vec::new();
        }

        let futures: Vec<_> = results
            .iter()
            .map(|result| self.score_one(question, result))
            .collect();
        let mut scored: Vec<ScoredChunk> = join_all(futures).await;

        scored.retain(|chunk| chunk.relevance_score >= self.threshold);
        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }
}
