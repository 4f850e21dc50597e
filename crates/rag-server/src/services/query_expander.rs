use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::llm_service::{ChatCompleter, CompletionRequest};
use crate::utils::lru::LruCache;
use crate::utils::sanitize::sanitize_query_input;

const CACHE_CAPACITY: usize = 1000;
const MAX_QUERY_LEN: usize = 500;
/// Queries longer than this are specific enough already.
const EXPANSION_CUTOFF: usize = 100;

const EXPANSION_SYSTEM_PROMPT: &str = "You expand short search queries with related terms and \
synonyms to improve semantic retrieval. Reply with the expanded query only, no explanations.";

/// LLM-backed query expansion with an LRU cache. Every failure path
/// degrades to the sanitized input.
pub struct QueryExpander {
    completer: Arc<dyn ChatCompleter>,
    cache: LruCache<String, String>,
    enabled: AtomicBool,
}

impl QueryExpander {
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

    /// Expand a query for embedding. Returns the input unchanged when
    /// disabled or empty, and the sanitized input when expansion is not
    /// worthwhile or the LLM output is implausible.
    pub async fn expand(&self, query: &str) -> String {
        if !self.is_enabled() || query.trim().is_empty() {
            return query.to_string();
        }

        let sanitized = sanitize_query_input(query, MAX_QUERY_LEN);
        if sanitized.is_empty() {
            return sanitized;
        }
        if sanitized.chars().count() > EXPANSION_CUTOFF {
            debug!("Query too long for expansion, skipping");
            return sanitized;
        }

        if let Some(cached) = self.cache.get(&sanitized) {
            debug!("Query expansion cache hit");
            return cached;
        }

        let request = CompletionRequest::new(format!(
            "Expand this search query with related terms and synonyms: {}",
            sanitized
        ))
        .with_system(EXPANSION_SYSTEM_PROMPT)
        .with_sampling(0.2, 100);

        let expanded = match self.completer.complete(request).await {
            Ok(completion) => completion.content.trim().to_string(),
            Err(err) => {
                warn!("Query expansion failed, using original query: {}", err);
                return sanitized;
            }
        };

        // Implausible output: shorter than the input, or runaway
        if expanded.chars().count() <= sanitized.chars().count()
            || expanded.chars().count() > MAX_QUERY_LEN
        {
            debug!("Discarding implausible expansion ({} chars)", expanded.len());
            return sanitized;
        }

        self.cache.set(sanitized, expanded.clone());
        expanded
    }
}
