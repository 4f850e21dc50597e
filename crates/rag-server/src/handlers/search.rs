use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::check_rate_limit;
use crate::models::{SearchFilters, SearchResult};
use crate::services::SearchRequest;
use crate::state::AppState;
use crate::utils::error::AppError;

#[derive(Debug, Deserialize)]
pub struct SearchRequestBody {
    pub query: String,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub rerank: Option<bool>,
    pub expand: Option<bool>,
    pub hyde: Option<bool>,
    pub document_ids: Option<Vec<Uuid>>,
    pub file_types: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponseBody {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub rerank_used: bool,
    pub hyde_used: bool,
    pub query_expanded: bool,
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequestBody>,
) -> Result<Json<SearchResponseBody>, AppError> {
    check_rate_limit(&state, "search")?;
    info!("Search request: {}", request.query);

    let filters = if request.document_ids.is_some() || request.file_types.is_some() {
        Some(SearchFilters {
            document_ids: request.document_ids,
            file_types: request.file_types,
        })
    } else {
        None
    };

    let outcome = state
        .search
        .search(SearchRequest {
            query: request.query,
            limit: request.limit,
            threshold: request.threshold,
            rerank: request.rerank,
            expand: request.expand,
            hyde: request.hyde,
            filters,
        })
        .await?;

    Ok(Json(SearchResponseBody {
        total: outcome.results.len(),
        rerank_used: outcome.rerank_used,
        hyde_used: outcome.hyde_used,
        query_expanded: outcome.query_expanded,
        results: outcome.results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SimilarRequestBody {
    pub content: String,
    pub limit: Option<usize>,
    pub exclude_document_id: Option<Uuid>,
}

pub async fn similar_handler(
    State(state): State<AppState>,
    Json(request): Json<SimilarRequestBody>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    check_rate_limit(&state, "search")?;

    let results = state
        .search
        .find_similar(
            &request.content,
            request.limit.unwrap_or(10).clamp(1, 100),
            request.exclude_document_id,
        )
        .await?;
    Ok(Json(results))
}
