use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::embedding_service::Embedder;
use super::llm_service::{ChatCompleter, CompletionRequest};
use crate::config::{ChunkingConfig, IngestionConfig};
use crate::database::{
    Chunk, DocumentStatus, IngestLookup, NewDocument, Repository,
};
use crate::document::{
    mime_type_for, validate_file_content, DocumentParser, FileType, ParsedDocument, TextChunker,
};
use crate::utils::error::AppError;
use crate::utils::locks::DocumentLockManager;
use crate::utils::sanitize::sanitize_error_message;
use crate::vector::{VectorPayload, VectorPoint, VectorStore};

/// Character budget handed to the auto-summary prompt.
const SUMMARY_INPUT_CHARS: usize = 8_000;
const MAX_TAGS: usize = 10;
const MAX_TAG_LEN: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub force_reindex: bool,
    pub chunking: Option<ChunkingConfig>,
    pub collection_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub document_id: Uuid,
    pub chunk_count: usize,
    pub status: DocumentStatus,
    /// True when an identical file was already indexed and nothing was
    /// written.
    pub unchanged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionResult {
    fn indexed(document_id: Uuid, chunk_count: usize) -> Self {
        Self {
            document_id,
            chunk_count,
            status: DocumentStatus::Indexed,
            unchanged: false,
            error: None,
        }
    }

    fn unchanged(document_id: Uuid, chunk_count: usize) -> Self {
        Self {
            document_id,
            chunk_count,
            status: DocumentStatus::Indexed,
            unchanged: true,
            error: None,
        }
    }

    fn failed(document_id: Uuid, error: String) -> Self {
        Self {
            document_id,
            chunk_count: 0,
            status: DocumentStatus::Failed,
            unchanged: false,
            error: Some(error),
        }
    }
}

/// Ingestion coordinator: validate -> lock -> checksum -> parse -> chunk ->
/// embed -> persist -> enhance -> finalize.
pub struct IngestionService {
    repository: Arc<Repository>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn ChatCompleter>,
    lock_manager: Arc<DocumentLockManager>,
    chunking: ChunkingConfig,
    config: IngestionConfig,
}

impl IngestionService {
    pub fn new(
        repository: Arc<Repository>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn ChatCompleter>,
        lock_manager: Arc<DocumentLockManager>,
        chunking: ChunkingConfig,
        config: IngestionConfig,
    ) -> Self {
        Self {
            repository,
            vector_store,
            embedder,
            completer,
            lock_manager,
            chunking,
            config,
        }
    }

    /// Index a file from disk. Validation errors surface as `Err`; once a
    /// document row exists, failures come back as a failed
    /// `IngestionResult` with the document marked `failed`.
    pub async fn index_document(
        &self,
        path: &str,
        options: IngestOptions,
    ) -> Result<IngestionResult, AppError> {
        let canonical = crate::utils::validate::validate_document_path(
            path,
            &self.config.allowed_base_dirs,
        )?;
        let file_type = FileType::from_path(&canonical)?;
        let filename = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let filepath = canonical.to_string_lossy().to_string();
        let mime_type = mime_type_for(&canonical);

        let data = tokio::fs::read(&canonical).await?;
        validate_file_content(&data, file_type)?;

        // At most one concurrent ingest per normalized path
        let _lock = self.lock_manager.acquire(&filepath).await;
        info!("Indexing {} ({} bytes)", filepath, data.len());

        self.ingest_bytes(filepath, filename, mime_type, file_type, data, options)
            .await
    }

    /// Index raw text handed over the API, addressed by a virtual path
    /// derived from the title.
    pub async fn index_text(
        &self,
        content: &str,
        title: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<IngestionResult, AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Title must not be empty".to_string()));
        }
        if title.contains('\0') {
            return Err(AppError::Validation("Title contains null byte".to_string()));
        }

        let filepath = format!("text://{}", title);
        let filename = format!("{}.txt", title);

        let _lock = self.lock_manager.acquire(&filepath).await;
        info!("Indexing text document {} ({} chars)", filepath, content.len());

        self.ingest_bytes(
            filepath,
            filename,
            "text/plain".to_string(),
            FileType::Txt,
            content.as_bytes().to_vec(),
            IngestOptions {
                metadata,
                ..IngestOptions::default()
            },
        )
        .await
    }

    /// Shared post-lock pipeline.
    async fn ingest_bytes(
        &self,
        filepath: String,
        filename: String,
        mime_type: String,
        file_type: FileType,
        data: Vec<u8>,
        options: IngestOptions,
    ) -> Result<IngestionResult, AppError> {
        let checksum = Self::sha256_hex(&data);

        let new_doc = NewDocument {
            id: Uuid::new_v4(),
            filename: filename.clone(),
            filepath: filepath.clone(),
            file_type: file_type.as_str().to_string(),
            file_size: data.len() as i64,
            mime_type,
            checksum,
            metadata: options.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            collection_id: options.collection_id,
        };

        let document = match self
            .repository
            .begin_ingest(&new_doc, options.force_reindex)
            .await?
        {
            IngestLookup::Unchanged(existing) => {
                debug!("Document {} unchanged, skipping", existing.id);
                return Ok(IngestionResult::unchanged(
                    existing.id,
                    existing.chunk_count as usize,
                ));
            }
            IngestLookup::Reindex(old) => {
                // Logged before the delete so a crash between delete and
                // insert can be resumed by hand
                info!(
                    "Reindexing {}: replacing document {} with {}",
                    filepath, old.id, new_doc.id
                );
                self.delete_document(old.id).await?;
                self.repository.insert_document(&new_doc).await?
            }
            IngestLookup::New(doc) => doc,
        };

        // From here on failures mark the document failed instead of
        // propagating
        match self
            .process_document(&document.id, &filename, &filepath, file_type, data, &options)
            .await
        {
            Ok(chunk_count) => Ok(IngestionResult::indexed(document.id, chunk_count)),
            Err(err) => {
                let message = sanitize_error_message(&err.to_string());
                warn!("Ingestion of {} failed: {}", filepath, message);
                if let Err(mark_err) = self
                    .repository
                    .mark_document_failed(document.id, &message)
                    .await
                {
                    warn!("Failed to mark document failed: {}", mark_err);
                }
                Ok(IngestionResult::failed(document.id, message))
            }
        }
    }

    async fn process_document(
        &self,
        document_id: &Uuid,
        filename: &str,
        filepath: &str,
        file_type: FileType,
        data: Vec<u8>,
        options: &IngestOptions,
    ) -> Result<usize, AppError> {
        let document_id = *document_id;

        // Parsing is CPU-bound; keep it off the runtime workers
        let parsed: ParsedDocument = tokio::task::spawn_blocking(move || {
            DocumentParser::parse(&data, file_type)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Parser task failed: {}", e)))??;

        if parsed.content.trim().is_empty() {
            return Err(AppError::Integrity(
                "No text content found in document".to_string(),
            ));
        }

        // Fold parsed metadata (title, pages, warnings, ...) into the row
        let mut metadata = options
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        if let (Some(map), Ok(serde_json::Value::Object(parsed_map))) = (
            metadata.as_object_mut(),
            serde_json::to_value(&parsed.metadata),
        ) {
            for (key, value) in parsed_map {
                map.entry(key).or_insert(value);
            }
        }
        self.repository
            .update_document_metadata(document_id, metadata)
            .await?;

        let chunking = options.chunking.clone().unwrap_or_else(|| self.chunking.clone());
        let chunker = TextChunker::new(&chunking);
        let text_chunks = chunker.chunk(&parsed.content, &parsed.sections);

        if text_chunks.is_empty() {
            return Err(AppError::Integrity(
                "Chunking produced no chunks".to_string(),
            ));
        }
        info!("Created {} chunks for document {}", text_chunks.len(), document_id);

        let texts: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();
        let batch = self.embedder.embed_batch(&texts).await?;

        if batch.vectors.len() != text_chunks.len() {
            return Err(AppError::Integrity(format!(
                "Embedding count mismatch: expected {}, got {}",
                text_chunks.len(),
                batch.vectors.len()
            )));
        }
        let dimension = self.embedder.dimension();
        for vector in &batch.vectors {
            if vector.len() != dimension {
                return Err(AppError::Integrity(format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    dimension,
                    vector.len()
                )));
            }
        }

        let chunks: Vec<Chunk> = text_chunks
            .iter()
            .map(|chunk| Chunk {
                id: Uuid::new_v4(),
                document_id,
                content: chunk.content.clone(),
                chunk_index: chunk.index as i64,
                start_offset: chunk.start_offset as i64,
                end_offset: chunk.end_offset as i64,
                token_count: chunk.token_count as i64,
                metadata: sqlx::types::Json(chunk.metadata.clone()),
            })
            .collect();

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(batch.vectors.into_iter())
            .map(|(chunk, vector)| VectorPoint {
                id: chunk.id,
                vector,
                payload: VectorPayload {
                    chunk_id: chunk.id,
                    document_id,
                    content: chunk.content.clone(),
                    chunk_index: chunk.chunk_index,
                    filename: filename.to_string(),
                    filepath: filepath.to_string(),
                    file_type: file_type.as_str().to_string(),
                    metadata: chunk.metadata.0.clone(),
                },
            })
            .collect();

        // Rows first, vectors second: a crash in between leaves the row in
        // `processing`, treated as failed on the next reindex
        self.repository.insert_chunks(&chunks).await?;
        self.vector_store.upsert_vectors(&points).await?;

        // Enhancements run together and are individually droppable
        let (summary, tags) = tokio::join!(
            self.generate_summary(&parsed.content),
            self.generate_tags(&parsed.content),
        );

        self.repository
            .finalize_document_indexed(document_id, chunks.len() as i64, summary, tags)
            .await?;

        info!("Document {} indexed with {} chunks", document_id, chunks.len());
        Ok(chunks.len())
    }

    /// Delete order: vectors, then chunks, then the document row, so a
    /// partial failure never leaves vectors pointing at a missing document.
    pub async fn delete_document(&self, document_id: Uuid) -> Result<bool, AppError> {
        self.vector_store
            .delete_vectors_by_document_id(document_id)
            .await?;
        self.repository
            .delete_chunks_by_document_id(document_id)
            .await?;
        self.repository.delete_document_row(document_id).await
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    async fn generate_summary(&self, content: &str) -> Option<String> {
        if !self.config.auto_summary {
            return None;
        }

        let excerpt: String = content.chars().take(SUMMARY_INPUT_CHARS).collect();
        let request = CompletionRequest::new(format!(
            "Summarize the following document in at most three sentences, \
             focusing on its main topic:\n\n{}",
            excerpt
        ))
        .with_sampling(0.3, 200);

        match self.completer.complete(request).await {
            Ok(completion) => {
                let summary = completion.content.trim().to_string();
                (!summary.is_empty()).then_some(summary)
            }
            Err(err) => {
                warn!("Auto-summary failed, continuing without it: {}", err);
                None
            }
        }
    }

    async fn generate_tags(&self, content: &str) -> Option<Vec<String>> {
        if !self.config.auto_tags {
            return None;
        }

        let excerpt: String = content.chars().take(SUMMARY_INPUT_CHARS).collect();
        let request = CompletionRequest::new(format!(
            "Produce up to {} short lowercase topic tags for this document. \
             Reply with a JSON array of strings only.\n\n{}",
            MAX_TAGS, excerpt
        ))
        .with_sampling(0.2, 150);

        match self.completer.complete(request).await {
            Ok(completion) => Self::validate_tags(&completion.content),
            Err(err) => {
                warn!("Auto-tagging failed, continuing without it: {}", err);
                None
            }
        }
    }

    /// Accept only a JSON array of non-empty lowercase strings under the
    /// length cap, at most `MAX_TAGS` of them.
    fn validate_tags(raw: &str) -> Option<Vec<String>> {
        let trimmed = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let parsed: Vec<String> = serde_json::from_str(trimmed).ok()?;
        let tags: Vec<String> = parsed
            .into_iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty() && tag.chars().count() < MAX_TAG_LEN)
            .take(MAX_TAGS)
            .collect();

        (!tags.is_empty()).then_some(tags)
    }
}
