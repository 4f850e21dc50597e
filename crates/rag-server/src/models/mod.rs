use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::ChunkMetadata;

/// A retrieved chunk with its similarity score normalized to [0, 1]
/// (or the reranker sentinel -1 after a fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub score: f32,
    pub chunk_index: i64,
    pub filename: String,
    pub filepath: String,
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_summary: Option<String>,
    pub metadata: ChunkMetadata,
}

/// AND-combined payload filters for vector search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_types: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_none() && self.file_types.is_none()
    }
}

/// A search result re-scored by the relevance filter.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub result: SearchResult,
    pub relevance_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_index: usize,
    pub quote: String,
    pub relevance_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Grounding verdict for an answer against its source chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub grounding_score: f32,
    pub is_grounded: bool,
    pub supported_claims: Vec<String>,
    pub unsupported_claims: Vec<String>,
    pub citations: Vec<Citation>,
}

impl VerificationResult {
    /// Neutral result returned when verification is disabled.
    pub fn neutral() -> Self {
        Self {
            grounding_score: 1.0,
            is_grounded: true,
            supported_claims: Vec::new(),
            unsupported_claims: Vec::new(),
            citations: Vec::new(),
        }
    }

    /// Conservative default when the verifier output cannot be parsed.
    pub fn unverifiable() -> Self {
        Self {
            grounding_score: 0.5,
            is_grounded: false,
            supported_claims: Vec::new(),
            unsupported_claims: vec!["Verification failed".to_string()],
            citations: Vec::new(),
        }
    }
}

/// LLM token accounting as reported by the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}
