use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::check_rate_limit;
use crate::models::SearchFilters;
use crate::services::{AskRequest, AskResponse};
use crate::state::AppState;
use crate::utils::error::AppError;

#[derive(Debug, Deserialize)]
pub struct AskRequestBody {
    pub question: String,
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub model: Option<String>,
    pub rerank: Option<bool>,
    #[serde(default)]
    pub verify: bool,
    pub expand: Option<bool>,
    pub hyde: Option<bool>,
    pub document_ids: Option<Vec<Uuid>>,
    pub file_types: Option<Vec<String>>,
}

pub async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequestBody>,
) -> Result<Json<AskResponse>, AppError> {
    check_rate_limit(&state, "ask")?;
    info!("Ask request: {}", request.question);

    let filters = if request.document_ids.is_some() || request.file_types.is_some() {
        Some(SearchFilters {
            document_ids: request.document_ids,
            file_types: request.file_types,
        })
    } else {
        None
    };

    let response = state
        .ask
        .ask(AskRequest {
            question: request.question,
            limit: request.limit,
            threshold: request.threshold,
            model: request.model,
            rerank: request.rerank,
            verify: request.verify,
            expand: request.expand,
            hyde: request.hyde,
            filters,
        })
        .await?;

    Ok(Json(response))
}
