pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::ChunkMetadata;
use crate::models::{SearchFilters, SearchResult};
use crate::utils::error::AppError;

/// Fixed payload shape written next to every vector. One point per chunk;
/// the point id equals the chunk id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub chunk_index: i64,
    pub filename: String,
    pub filepath: String,
    pub file_type: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub score: f32,
    pub payload: VectorPayload,
}

impl ScoredPoint {
    pub fn into_search_result(self, document_summary: Option<String>) -> SearchResult {
        SearchResult {
            chunk_id: self.payload.chunk_id,
            document_id: self.payload.document_id,
            content: self.payload.content,
            score: self.score,
            chunk_index: self.payload.chunk_index,
            filename: self.payload.filename,
            filepath: self.payload.filepath,
            file_type: self.payload.file_type,
            document_summary,
            metadata: self.payload.metadata,
        }
    }
}

/// ANN storage seam. One implementation talks to Qdrant; tests substitute
/// an in-memory double.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotently create the collection (cosine distance, configured
    /// dimension) with payload indexes on document_id and file_type.
    async fn ensure_collection(&self) -> Result<(), AppError>;

    /// Upsert with wait-for-commit semantics.
    async fn upsert_vectors(&self, points: &[VectorPoint]) -> Result<(), AppError>;

    async fn delete_vectors_by_document_id(&self, document_id: Uuid) -> Result<(), AppError>;

    async fn search_vectors(
        &self,
        query_vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<ScoredPoint>, AppError>;
}

pub use qdrant::QdrantStore;
