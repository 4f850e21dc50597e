use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::llm_service::{ChatCompleter, CompletionRequest};
use crate::utils::lru::LruCache;
use crate::utils::sanitize::sanitize_query_input;

const CACHE_CAPACITY: usize = 500;
const MAX_QUERY_LEN: usize = 500;
const MIN_QUERY_LEN: usize = 15;
/// A generated passage shorter than this is useless as an embedding proxy.
const MIN_PASSAGE_LEN: usize = 50;

/// Simple lookups answer better with the raw query.
static SIMPLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^what\s+is\s+(a|an|the)?\b.*$",
        r"(?i)^who\s+is\b.*$",
        r"(?i)^where\s+is\b.*$",
        r"(?i)^when\s+(was|did|is)\b.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Reasoning-shaped questions benefit from a hypothetical answer document.
static COMPLEX_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bhow\s+(do|to|can|should)\b",
        r"(?i)\bwhy\b",
        r"(?i)\b(explain|describe|compare)\b",
        r"(?i)\b(troubleshoot|fix|solve|resolve)\b",
        r"(?i)\bbest\s+(practice|way)\b",
        r"(?i)\bdifference\s+between\b",
        r"(?i)\bsteps\s+to\b",
        r"^(วิธี|ขั้นตอน|แก้ไข|อธิบาย)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const HYDE_SYSTEM_PROMPT: &str = "Write a short factual passage that would answer the user's \
question, as if taken from a reference document. No preamble, no disclaimers.";

/// Hypothetical Document Embedding: embed a generated candidate answer
/// instead of the raw question.
pub struct HydeGenerator {
    completer: Arc<dyn ChatCompleter>,
    cache: LruCache<String, String>,
    enabled: AtomicBool,
}

impl HydeGenerator {
    pub fn new(completer: Arc<dyn ChatCompleter>, enabled: bool) -> Self {
        Self {
            completer,
            cache: LruCache::new(CACHE_CAPACITY),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Decide whether a query is worth the extra LLM round-trip.
    pub fn should_use_hyde(&self, query: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_LEN {
            return false;
        }

        if COMPLEX_PATTERNS.iter().any(|p| p.is_match(query)) {
            return true;
        }
        if SIMPLE_PATTERNS.iter().any(|p| p.is_match(query)) {
            return false;
        }

        // Ambiguous shape: long queries tend to be complex
        query.split_whitespace().count() > 5
    }

    /// Generate the hypothetical passage; any failure degrades to the
    /// sanitized query.
    pub async fn generate_hypothetical_document(&self, query: &str) -> String {
        let sanitized = sanitize_query_input(query, MAX_QUERY_LEN);
        if sanitized.is_empty() {
            return sanitized;
        }

        if let Some(cached) = self.cache.get(&sanitized) {
            debug!("HyDE cache hit");
            return cached;
        }

        let request = CompletionRequest::new(format!(
            "Write a short passage that answers this question: {}",
            sanitized
        ))
        .with_system(HYDE_SYSTEM_PROMPT)
        .with_sampling(0.5, 400);

        let passage = match self.completer.complete(request).await {
            Ok(completion) => completion.content.trim().to_string(),
            Err(err) => {
                warn!("HyDE generation failed, using query directly: {}", err);
                return sanitized;
            }
        };

        if passage.chars().count() <= MIN_PASSAGE_LEN {
            debug!("HyDE passage too short ({} chars), using query", passage.len());
            return sanitized;
        }

        self.cache.set(sanitized, passage.clone());
        passage
    }
}
