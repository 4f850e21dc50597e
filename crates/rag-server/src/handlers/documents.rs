use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::check_rate_limit;
use crate::database::Document;
use crate::services::{IngestOptions, IngestionResult};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::validate::validate_uuid;

#[derive(Debug, Deserialize)]
pub struct IndexDocumentRequest {
    pub path: String,
    #[serde(default)]
    pub force_reindex: bool,
    pub collection_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct IndexTextRequest {
    pub content: String,
    pub title: String,
    pub metadata: Option<serde_json::Value>,
}

pub async fn index_document_handler(
    State(state): State<AppState>,
    Json(request): Json<IndexDocumentRequest>,
) -> Result<Json<IngestionResult>, AppError> {
    check_rate_limit(&state, "index")?;
    info!("Index request for {}", request.path);

    let result = state
        .ingestion
        .index_document(
            &request.path,
            IngestOptions {
                force_reindex: request.force_reindex,
                collection_id: request.collection_id,
                metadata: request.metadata,
                ..IngestOptions::default()
            },
        )
        .await?;

    Ok(Json(result))
}

pub async fn index_text_handler(
    State(state): State<AppState>,
    Json(request): Json<IndexTextRequest>,
) -> Result<Json<IngestionResult>, AppError> {
    check_rate_limit(&state, "index")?;

    let result = state
        .ingestion
        .index_text(&request.content, &request.title, request.metadata)
        .await?;

    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

pub async fn list_documents_handler(
    State(state): State<AppState>,
) -> Result<Json<ListDocumentsResponse>, AppError> {
    let documents = state.repository.get_all_documents().await?;
    let total = documents.len();
    Ok(Json(ListDocumentsResponse { documents, total }))
}

pub async fn get_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let id = validate_uuid(&id)?;
    let document = state
        .repository
        .get_document_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))?;
    Ok(Json(document))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub async fn delete_document_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let id = validate_uuid(&id)?;
    if state.repository.get_document_by_id(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Document {} not found", id)));
    }

    let deleted = state.ingestion.delete_document(id).await?;
    info!("Deleted document {}", id);
    Ok(Json(DeleteResponse { deleted }))
}
