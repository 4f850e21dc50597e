use chrono::Utc;
use sqlx::types::Json;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    Chunk, Collection, CollectionWithCount, Document, DocumentStatus, NewDocument, NewQueryLog,
};
use super::DbPool;
use crate::utils::error::AppError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    color       TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    filename      TEXT NOT NULL,
    filepath      TEXT NOT NULL UNIQUE,
    file_type     TEXT NOT NULL,
    file_size     INTEGER NOT NULL,
    mime_type     TEXT NOT NULL,
    checksum      TEXT NOT NULL,
    status        TEXT NOT NULL,
    chunk_count   INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    indexed_at    TEXT,
    metadata      TEXT NOT NULL DEFAULT '{}',
    summary       TEXT,
    tags          TEXT,
    collection_id TEXT REFERENCES collections(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id           TEXT PRIMARY KEY,
    document_id  TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    content      TEXT NOT NULL,
    chunk_index  INTEGER NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset   INTEGER NOT NULL,
    token_count  INTEGER NOT NULL,
    metadata     TEXT NOT NULL DEFAULT '{}',
    UNIQUE (document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id);

CREATE TABLE IF NOT EXISTS query_logs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    query        TEXT NOT NULL,
    query_type   TEXT NOT NULL,
    source       TEXT,
    result_count INTEGER NOT NULL,
    top_score    REAL,
    latency_ms   INTEGER NOT NULL,
    metadata     TEXT,
    created_at   TEXT NOT NULL
);
"#;

/// Outcome of the transactional ingest lookup (§ ingest pipeline step 4).
#[derive(Debug)]
pub enum IngestLookup {
    /// Same checksum already indexed; nothing to do.
    Unchanged(Document),
    /// Path exists with different content (or reindex forced); the caller
    /// deletes the old document and inserts a fresh row.
    Reindex(Document),
    /// No row for this path existed; a `processing` row was inserted.
    New(Document),
}

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn db(&self) -> &DbPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<(), AppError> {
        sqlx::raw_sql(SCHEMA)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Atomic lookup-or-insert for an ingest: one transaction decides
    /// whether the path is unchanged, needs a reindex, or is new.
    pub async fn begin_ingest(
        &self,
        new_doc: &NewDocument,
        force_reindex: bool,
    ) -> Result<IngestLookup, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;

        let existing = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE filepath = ?")
            .bind(&new_doc.filepath)
            .fetch_optional(&mut *tx)
            .await?;

        let lookup = match existing {
            Some(doc)
                if doc.checksum == new_doc.checksum
                    && doc.status == DocumentStatus::Indexed
                    && !force_reindex =>
            {
                IngestLookup::Unchanged(doc)
            }
            Some(doc) => IngestLookup::Reindex(doc),
            None => {
                let inserted = Self::insert_document_tx(&mut tx, new_doc).await?;
                IngestLookup::New(inserted)
            }
        };

        tx.commit().await?;
        Ok(lookup)
    }

    pub async fn insert_document(&self, new_doc: &NewDocument) -> Result<Document, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;
        let doc = Self::insert_document_tx(&mut tx, new_doc).await?;
        tx.commit().await?;
        Ok(doc)
    }

    async fn insert_document_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        new_doc: &NewDocument,
    ) -> Result<Document, AppError> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO documents
               (id, filename, filepath, file_type, file_size, mime_type, checksum,
                status, chunk_count, created_at, updated_at, metadata, collection_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)"#,
        )
        .bind(new_doc.id)
        .bind(&new_doc.filename)
        .bind(&new_doc.filepath)
        .bind(&new_doc.file_type)
        .bind(new_doc.file_size)
        .bind(&new_doc.mime_type)
        .bind(&new_doc.checksum)
        .bind(DocumentStatus::Processing)
        .bind(now)
        .bind(now)
        .bind(Json(new_doc.metadata.clone()))
        .bind(new_doc.collection_id)
        .execute(&mut **tx)
        .await?;

        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(new_doc.id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(doc)
    }

    pub async fn get_document_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.get_pool())
            .await?;
        Ok(doc)
    }

    pub async fn get_document_by_path(&self, filepath: &str) -> Result<Option<Document>, AppError> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE filepath = ?")
            .bind(filepath)
            .fetch_optional(self.pool.get_pool())
            .await?;
        Ok(doc)
    }

    /// All documents, newest first.
    pub async fn get_all_documents(&self) -> Result<Vec<Document>, AppError> {
        let docs =
            sqlx::query_as::<_, Document>("SELECT * FROM documents ORDER BY created_at DESC")
                .fetch_all(self.pool.get_pool())
                .await?;
        Ok(docs)
    }

    pub async fn update_document_metadata(
        &self,
        id: Uuid,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE documents SET metadata = ?, updated_at = ? WHERE id = ?")
            .bind(Json(metadata))
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn update_document_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    /// Mark a document failed, recording the (already sanitized) error in
    /// its metadata.
    pub async fn mark_document_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let mut tx = self.pool.get_pool().begin().await?;

        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(doc) = doc {
            let mut metadata = doc.metadata.0;
            if let Some(map) = metadata.as_object_mut() {
                map.insert("error".to_string(), serde_json::Value::String(error.to_string()));
            }
            sqlx::query("UPDATE documents SET status = ?, metadata = ?, updated_at = ? WHERE id = ?")
                .bind(DocumentStatus::Failed)
                .bind(Json(metadata))
                .bind(Utc::now())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Final ingest step: status indexed, chunk count, indexed_at, and any
    /// enhancement output.
    pub async fn finalize_document_indexed(
        &self,
        id: Uuid,
        chunk_count: i64,
        summary: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        sqlx::query(
            r#"UPDATE documents
               SET status = ?, chunk_count = ?, indexed_at = ?, updated_at = ?,
                   summary = COALESCE(?, summary), tags = COALESCE(?, tags)
               WHERE id = ?"#,
        )
        .bind(DocumentStatus::Indexed)
        .bind(chunk_count)
        .bind(now)
        .bind(now)
        .bind(summary)
        .bind(tags.map(Json))
        .bind(id)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    /// Delete the document row; chunks cascade.
    pub async fn delete_document_row(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    /// Insert a chunk batch inside a single transaction.
    pub async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), AppError> {
        let mut tx = self.pool.get_pool().begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"INSERT INTO chunks
                   (id, document_id, content, chunk_index, start_offset, end_offset,
                    token_count, metadata)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(chunk.id)
            .bind(chunk.document_id)
            .bind(&chunk.content)
            .bind(chunk.chunk_index)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(chunk.token_count)
            .bind(Json(chunk.metadata.0.clone()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} chunks", chunks.len());
        Ok(())
    }

    /// Chunks of a document ordered by chunk_index.
    pub async fn get_chunks_by_document_id(&self, document_id: Uuid) -> Result<Vec<Chunk>, AppError> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(chunks)
    }

    pub async fn delete_chunks_by_document_id(&self, document_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_chunks(&self, document_id: Uuid) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(self.pool.get_pool())
            .await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub async fn create_collection(
        &self,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Collection, AppError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO collections (id, name, description, color, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(color)
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await;

        match result {
            Ok(_) => {}
            Err(err) => {
                return Err(match AppError::from(err) {
                    AppError::Conflict(_) => {
                        AppError::Conflict(format!("Collection '{}' already exists", name))
                    }
                    other => other,
                })
            }
        }

        let collection = sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool.get_pool())
            .await?;
        Ok(collection)
    }

    pub async fn get_collection(&self, id: Uuid) -> Result<Option<Collection>, AppError> {
        let collection = sqlx::query_as::<_, Collection>("SELECT * FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.get_pool())
            .await?;
        Ok(collection)
    }

    /// Collections with derived document counts.
    pub async fn list_collections(&self) -> Result<Vec<CollectionWithCount>, AppError> {
        let collections = sqlx::query_as::<_, CollectionWithCount>(
            r#"SELECT c.id, c.name, c.description, c.color, c.created_at,
                      COUNT(d.id) AS document_count
               FROM collections c
               LEFT JOIN documents d ON d.collection_id = c.id
               GROUP BY c.id
               ORDER BY c.name ASC"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(collections)
    }

    /// Deleting a collection detaches its documents (FK SET NULL).
    pub async fn delete_collection(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Query logs
    // ------------------------------------------------------------------

    pub async fn insert_query_log(&self, log: &NewQueryLog) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO query_logs
               (query, query_type, source, result_count, top_score, latency_ms, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&log.query)
        .bind(log.query_type)
        .bind(&log.source)
        .bind(log.result_count)
        .bind(log.top_score)
        .bind(log.latency_ms)
        .bind(log.metadata.clone().map(Json))
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }
}
