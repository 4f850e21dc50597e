use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Document lifecycle: pending -> processing -> indexed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub filepath: String,
    pub file_type: String,
    pub file_size: i64,
    pub mime_type: String,
    pub checksum: String,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub metadata: Json<serde_json::Value>,
    pub summary: Option<String>,
    pub tags: Option<Json<Vec<String>>>,
    pub collection_id: Option<Uuid>,
}

/// Fields for a fresh `processing` row; the rest is defaulted at insert.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Uuid,
    pub filename: String,
    pub filepath: String,
    pub file_type: String,
    pub file_size: i64,
    pub mime_type: String,
    pub checksum: String,
    pub metadata: serde_json::Value,
    pub collection_id: Option<Uuid>,
}

/// Per-chunk provenance carried into the vector payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headings: Option<Vec<String>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub chunk_index: i64,
    pub start_offset: i64,
    pub end_offset: i64,
    pub token_count: i64,
    pub metadata: Json<ChunkMetadata>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CollectionWithCount {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub document_count: i64,
}

/// Append-only query analytics row; written best-effort, never read by the
/// retrieval pipelines.
#[derive(Debug, Clone)]
pub struct NewQueryLog {
    pub query: String,
    pub query_type: QueryType,
    pub source: Option<String>,
    pub result_count: i64,
    pub top_score: Option<f32>,
    pub latency_ms: i64,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Search,
    Ask,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Search => write!(f, "search"),
            QueryType::Ask => write!(f, "ask"),
        }
    }
}
