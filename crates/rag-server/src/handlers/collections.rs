use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::{Collection, CollectionWithCount};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::validate::validate_uuid;

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

pub async fn create_collection_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateCollectionRequest>,
) -> Result<Json<Collection>, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Collection name must not be empty".to_string()));
    }

    let collection = state
        .repository
        .create_collection(name, request.description.as_deref(), request.color.as_deref())
        .await?;
    info!("Created collection {}", collection.name);
    Ok(Json(collection))
}

#[derive(Debug, Serialize)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionWithCount>,
}

pub async fn list_collections_handler(
    State(state): State<AppState>,
) -> Result<Json<ListCollectionsResponse>, AppError> {
    let collections = state.repository.list_collections().await?;
    Ok(Json(ListCollectionsResponse { collections }))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub async fn delete_collection_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let id = validate_uuid(&id)?;
    let deleted = state.repository.delete_collection(id).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("Collection {} not found", id)));
    }
    Ok(Json(DeleteResponse { deleted }))
}
