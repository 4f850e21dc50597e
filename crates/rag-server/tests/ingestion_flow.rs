mod common;

use common::{StubEmbedder, TestHarness, DIMENSION};
use rag_server::database::DocumentStatus;
use rag_server::models::SearchFilters;
use rag_server::services::{IngestOptions, SearchRequest};
use rag_server::utils::error::AppError;
use std::sync::atomic::Ordering;

const RAG_MD: &str = "# RAG\nRAG combines retrieval with generation.";

/// S1: ingest a markdown file, then find it by semantic search.
#[tokio::test]
async fn ingest_then_search() {
    let harness = TestHarness::new().await;
    let path = harness.write_file("rag.md", RAG_MD);

    let result = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Indexed);
    assert_eq!(result.chunk_count, 1);
    assert!(result.error.is_none());

    // Stored state matches the result
    let document = harness
        .repository
        .get_document_by_id(result.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Indexed);
    assert_eq!(document.chunk_count, 1);
    assert!(document.indexed_at.is_some());
    assert_eq!(document.metadata.0["title"], serde_json::json!("RAG"));

    let chunks = harness
        .repository
        .get_chunks_by_document_id(result.document_id)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(
        harness.vector_store.points_for_document(result.document_id),
        1
    );

    let outcome = harness
        .search
        .search(SearchRequest {
            query: "What is RAG?".to_string(),
            ..SearchRequest::default()
        })
        .await
        .unwrap();

    assert!(!outcome.results.is_empty());
    let top = &outcome.results[0];
    assert!(top.content.contains("RAG combines retrieval"));
    assert!(top.score >= 0.0 && top.score <= 1.0);
    assert_eq!(top.document_id, result.document_id);
}

/// S2: re-ingesting an unchanged file is a no-op with the same id.
#[tokio::test]
async fn reindex_unchanged_is_idempotent() {
    let harness = TestHarness::new().await;
    let path = harness.write_file("rag.md", RAG_MD);

    let first = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();
    let upserts_after_first = harness.vector_store.upsert_calls.load(Ordering::SeqCst);

    let second = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.chunk_count, first.chunk_count);
    assert!(second.unchanged);
    // No new vectors were written
    assert_eq!(
        harness.vector_store.upsert_calls.load(Ordering::SeqCst),
        upserts_after_first
    );
}

/// S3: changed bytes produce a new document; the old one and its vectors
/// are gone.
#[tokio::test]
async fn reindex_changed_replaces_document() {
    let harness = TestHarness::new().await;
    let path = harness.write_file("rag.md", RAG_MD);

    let first = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    harness.write_file(
        "rag.md",
        "# RAG\nRAG combines retrieval with generation. Updated edition.",
    );
    let second = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    assert_ne!(second.document_id, first.document_id);
    assert_eq!(second.status, DocumentStatus::Indexed);

    // Old document row and vectors removed
    assert!(harness
        .repository
        .get_document_by_id(first.document_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(harness.vector_store.points_for_document(first.document_id), 0);
    assert!(harness.vector_store.points_for_document(second.document_id) > 0);
}

/// Delete law: document, chunks and vectors all disappear together.
#[tokio::test]
async fn delete_removes_everything() {
    let harness = TestHarness::new().await;
    let path = harness.write_file("rag.md", RAG_MD);

    let result = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    assert!(harness.ingestion.delete_document(result.document_id).await.unwrap());

    assert!(harness
        .repository
        .get_document_by_id(result.document_id)
        .await
        .unwrap()
        .is_none());
    assert!(harness
        .repository
        .get_chunks_by_document_id(result.document_id)
        .await
        .unwrap()
        .is_empty());

    let filtered = harness
        .search
        .search(SearchRequest {
            query: "What is RAG?".to_string(),
            filters: Some(SearchFilters {
                document_ids: Some(vec![result.document_id]),
                file_types: None,
            }),
            ..SearchRequest::default()
        })
        .await
        .unwrap();
    assert!(filtered.results.is_empty());
}

/// S7: embeddings of the wrong dimension fail the ingest and mark the
/// document failed.
#[tokio::test]
async fn dimension_mismatch_marks_failed() {
    let embedder = StubEmbedder::with_output_dimension(DIMENSION, DIMENSION / 2);
    let harness = TestHarness::with_embedder(embedder).await;
    let path = harness.write_file("rag.md", RAG_MD);

    let result = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Failed);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("Embedding dimension mismatch"));

    let document = harness
        .repository
        .get_document_by_id(result.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Failed);
    // No vectors were written for the failed ingest
    assert_eq!(harness.vector_store.points_for_document(result.document_id), 0);
}

/// Empty documents are rejected after the row exists: failed result, not
/// an Err.
#[tokio::test]
async fn empty_document_fails_gracefully() {
    let harness = TestHarness::new().await;
    let path = harness.write_file("empty.txt", "   ");

    let result = harness
        .ingestion
        .index_document(&path, IngestOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Failed);
    assert!(result.error.is_some());
}

/// Path validation failures surface before any row is created.
#[tokio::test]
async fn traversal_rejected_before_ingest() {
    let harness = TestHarness::new().await;
    let err = harness
        .ingestion
        .index_document("/tmp/../etc/passwd", IngestOptions::default())
        .await;
    assert!(matches!(err, Err(AppError::Validation(_))));
    assert!(harness.repository.get_all_documents().await.unwrap().is_empty());
}

/// index_text follows the same pipeline keyed by a virtual path.
#[tokio::test]
async fn index_text_roundtrip() {
    let harness = TestHarness::new().await;

    let result = harness
        .ingestion
        .index_text(
            "Retrieval augmented generation mixes search with language models.",
            "notes",
            Some(serde_json::json!({"source": "api"})),
        )
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Indexed);
    assert_eq!(result.chunk_count, 1);

    let document = harness
        .repository
        .get_document_by_id(result.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.filepath, "text://notes");
    assert_eq!(document.metadata.0["source"], serde_json::json!("api"));

    // Unchanged re-submission is idempotent here too
    let again = harness
        .ingestion
        .index_text(
            "Retrieval augmented generation mixes search with language models.",
            "notes",
            None,
        )
        .await
        .unwrap();
    assert_eq!(again.document_id, result.document_id);
    assert!(again.unchanged);
}

/// Concurrent ingests of the same path serialize on the document lock and
/// converge to one document.
#[tokio::test]
async fn concurrent_ingests_same_path_serialize() {
    let harness = std::sync::Arc::new(TestHarness::new().await);
    let path = harness.write_file("rag.md", RAG_MD);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let harness = harness.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            harness
                .ingestion
                .index_document(&path, IngestOptions::default())
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.status, DocumentStatus::Indexed);
        ids.push(result.document_id);
    }

    let documents = harness.repository.get_all_documents().await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(
        harness.vector_store.points_for_document(documents[0].id),
        documents[0].chunk_count as usize
    );
}
