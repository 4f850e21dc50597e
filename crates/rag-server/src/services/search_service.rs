use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::embedding_service::Embedder;
use super::hyde::HydeGenerator;
use super::query_expander::QueryExpander;
use super::reranker_service::Reranker;
use crate::config::{RerankConfig, SearchConfig};
use crate::database::{NewQueryLog, QueryType, Repository};
use crate::models::{SearchFilters, SearchResult};
use crate::utils::error::AppError;
use crate::vector::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub rerank: Option<bool>,
    pub expand: Option<bool>,
    pub hyde: Option<bool>,
    pub filters: Option<SearchFilters>,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// True only when the cross-encoder actually reordered the candidates
    /// (not for the short-circuit or the failure fallback).
    pub rerank_used: bool,
    pub hyde_used: bool,
    pub query_expanded: bool,
    pub original_query: String,
}

impl SearchOutcome {
    fn empty(query: &str) -> Self {
        Self {
            results: Vec::new(),
            rerank_used: false,
            hyde_used: false,
            query_expanded: false,
            original_query: query.to_string(),
        }
    }
}

/// Retrieval coordinator: enhancer -> embed -> ANN -> optional rerank.
pub struct SearchService {
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    vector_store: Arc<dyn VectorStore>,
    repository: Arc<Repository>,
    expander: Arc<QueryExpander>,
    hyde: Arc<HydeGenerator>,
    search_config: SearchConfig,
    rerank_config: RerankConfig,
}

impl SearchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
        vector_store: Arc<dyn VectorStore>,
        repository: Arc<Repository>,
        expander: Arc<QueryExpander>,
        hyde: Arc<HydeGenerator>,
        search_config: SearchConfig,
        rerank_config: RerankConfig,
    ) -> Self {
        Self {
            embedder,
            reranker,
            vector_store,
            repository,
            expander,
            hyde,
            search_config,
            rerank_config,
        }
    }

    /// Attach document summaries to raw vector hits.
    async fn hydrate_results(
        &self,
        points: Vec<crate::vector::ScoredPoint>,
    ) -> Vec<SearchResult> {
        let mut summaries: HashMap<Uuid, Option<String>> = HashMap::new();

        for point in &points {
            let doc_id = point.payload.document_id;
            if let std::collections::hash_map::Entry::Vacant(entry) = summaries.entry(doc_id) {
                let summary = match self.repository.get_document_by_id(doc_id).await {
                    Ok(Some(doc)) => doc.summary,
                    _ => None,
                };
                entry.insert(summary);
            }
        }

        points
            .into_iter()
            .map(|point| {
                let summary = summaries
                    .get(&point.payload.document_id)
                    .cloned()
                    .flatten();
                let mut result = point.into_search_result(summary);
                result.score = result.score.clamp(0.0, 1.0);
                result
            })
            .collect()
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchOutcome, AppError> {
        let started = Instant::now();
        let original_query = request.query.trim().to_string();
        if original_query.is_empty() {
            return Ok(SearchOutcome::empty(&request.query));
        }

        let limit = request
            .limit
            .unwrap_or(self.search_config.limit)
            .clamp(1, 100);
        let threshold = request.threshold.unwrap_or(self.search_config.threshold);
        let use_rerank = request.rerank.unwrap_or(self.rerank_config.enabled);

        // HyDE wins over expansion when both are in play: the hypothetical
        // document replaces the embedding input and the expander is skipped.
        let hyde_allowed = request.hyde.unwrap_or(true);
        let use_hyde = hyde_allowed && self.hyde.should_use_hyde(&original_query);

        let mut query_expanded = false;
        let embedding_input = if use_hyde {
            info!("Using HyDE embedding for query");
            self.hyde
                .generate_hypothetical_document(&original_query)
                .await
        } else if request.expand.unwrap_or(true) {
            let expanded = self.expander.expand(&original_query).await;
            query_expanded = expanded != original_query;
            expanded
        } else {
            original_query.clone()
        };

        let candidate_limit = if use_rerank {
            limit * self.rerank_config.candidate_multiplier
        } else {
            limit
        };

        let query_vector = self.embedder.embed_single(&embedding_input).await?;

        let points = self
            .vector_store
            .search_vectors(
                &query_vector,
                candidate_limit,
                threshold,
                request.filters.as_ref(),
            )
            .await?;
        let candidates = self.hydrate_results(points).await;
        debug!("ANN returned {} candidates", candidates.len());

        let (mut results, rerank_used) = if use_rerank && candidates.len() > limit {
            // Rerank against the ORIGINAL query, not the enhanced input
            let documents: Vec<String> =
                candidates.iter().map(|c| c.content.clone()).collect();
            let ranked = self.reranker.rerank(&original_query, &documents, limit).await;

            let reranked = ranked
                .iter()
                .any(|r| r.relevance_score >= 0.0);

            let mut reordered = Vec::with_capacity(ranked.len());
            for item in ranked {
                let mut result = candidates[item.index].clone();
                // Cross-encoder score, or the -1 sentinel after a fallback
                result.score = item.relevance_score;
                reordered.push(result);
            }
            (reordered, reranked)
        } else {
            (candidates.into_iter().take(limit).collect(), false)
        };

        results.truncate(limit);

        self.log_query(&original_query, QueryType::Search, &results, started)
            .await;

        Ok(SearchOutcome {
            results,
            rerank_used,
            hyde_used: use_hyde,
            query_expanded,
            original_query,
        })
    }

    /// Find chunks similar to an arbitrary piece of content.
    pub async fn find_similar(
        &self,
        content: &str,
        limit: usize,
        exclude_document_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>, AppError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_single(content).await?;

        // Over-fetch so post-filtering the excluded document still fills
        // the requested limit
        let fetch_limit = if exclude_document_id.is_some() {
            limit + 10
        } else {
            limit
        };

        let points = self
            .vector_store
            .search_vectors(&vector, fetch_limit, 0.0, None)
            .await?;
        let mut results = self.hydrate_results(points).await;

        if let Some(excluded) = exclude_document_id {
            results.retain(|r| r.document_id != excluded);
        }
        results.truncate(limit);
        Ok(results)
    }

    /// Best-effort analytics; failures never surface.
    async fn log_query(
        &self,
        query: &str,
        query_type: QueryType,
        results: &[SearchResult],
        started: Instant,
    ) {
        let log = NewQueryLog {
            query: query.to_string(),
            query_type,
            source: None,
            result_count: results.len() as i64,
            top_score: results.first().map(|r| r.score),
            latency_ms: started.elapsed().as_millis() as i64,
            metadata: None,
        };
        if let Err(err) = self.repository.insert_query_log(&log).await {
            warn!("Failed to write query log: {}", err);
        }
    }
}
