#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use rag_server::config::{
    ChunkingConfig, IngestionConfig, RerankConfig, SearchConfig, VerificationConfig,
};
use rag_server::database::{DbPool, Repository};
use rag_server::models::{SearchFilters, Usage};
use rag_server::services::{
    AskService, ChatCompleter, Completion, CompletionRequest, Embedder, EmbeddingBatch,
    HydeGenerator, IngestionService, QueryExpander, RerankResult, Reranker, SearchService,
    VerificationService, NOT_RERANKED,
};
use rag_server::utils::error::AppError;
use rag_server::utils::limiters::Limiters;
use rag_server::utils::locks::DocumentLockManager;
use rag_server::vector::{ScoredPoint, VectorPayload, VectorPoint, VectorStore};

pub const DIMENSION: usize = 32;

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Deterministic bag-of-words embedding: shared words produce shared
/// dimensions, so related texts land near each other.
pub fn bow_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension];
    v[0] = 1.0;
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let idx = 1 + (hasher.finish() as usize % (dimension - 1));
        v[idx] += 1.0;
    }
    normalize(v)
}

/// Embedder double. `output_dimension` can diverge from the declared
/// dimension to provoke integrity failures.
pub struct StubEmbedder {
    pub dimension: usize,
    pub output_dimension: usize,
    pub overrides: Mutex<HashMap<String, Vec<f32>>>,
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            output_dimension: dimension,
            overrides: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_output_dimension(dimension: usize, output_dimension: usize) -> Self {
        Self {
            dimension,
            output_dimension,
            overrides: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn override_embedding(&self, text: &str, vector: Vec<f32>) {
        self.overrides.lock().insert(text.to_string(), vector);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.overrides.lock().get(text) {
            return v.clone();
        }
        bow_embedding(text, self.output_dimension)
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingBatch, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.vector_for(t)).collect(),
            model: "stub-embedder".to_string(),
            usage: Usage::default(),
        })
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// In-memory cosine-similarity vector store.
#[derive(Default)]
pub struct MemoryVectorStore {
    points: Mutex<HashMap<Uuid, (Vec<f32>, VectorPayload)>>,
    pub upsert_calls: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_points(&self) -> usize {
        self.points.lock().len()
    }

    pub fn points_for_document(&self, document_id: Uuid) -> usize {
        self.points
            .lock()
            .values()
            .filter(|(_, p)| p.document_id == document_id)
            .count()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn upsert_vectors(&self, points: &[VectorPoint]) -> Result<(), AppError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.points.lock();
        for point in points {
            store.insert(
                point.id,
                (normalize(point.vector.clone()), point.payload.clone()),
            );
        }
        Ok(())
    }

    async fn delete_vectors_by_document_id(&self, document_id: Uuid) -> Result<(), AppError> {
        self.points
            .lock()
            .retain(|_, (_, payload)| payload.document_id != document_id);
        Ok(())
    }

    async fn search_vectors(
        &self,
        query_vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<ScoredPoint>, AppError> {
        let query = normalize(query_vector.to_vec());
        let store = self.points.lock();

        let mut scored: Vec<ScoredPoint> = store
            .values()
            .filter(|(_, payload)| match filters {
                Some(f) => {
                    let doc_ok = f
                        .document_ids
                        .as_ref()
                        .map(|ids| ids.contains(&payload.document_id))
                        .unwrap_or(true);
                    let type_ok = f
                        .file_types
                        .as_ref()
                        .map(|types| types.contains(&payload.file_type))
                        .unwrap_or(true);
                    doc_ok && type_ok
                }
                None => true,
            })
            .map(|(vector, payload)| {
                let score: f32 = vector.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                ScoredPoint {
                    score,
                    payload: payload.clone(),
                }
            })
            .filter(|p| p.score >= score_threshold)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Routes prompts by their system prompt, standing in for the chat gateway.
pub struct StubCompleter {
    pub answer: String,
    pub relevance_score: f32,
    pub grounding_reply: Option<String>,
    pub calls: AtomicUsize,
}

impl StubCompleter {
    pub fn new() -> Self {
        Self {
            answer: "RAG combines retrieval with generation, as described in rag.md.".to_string(),
            relevance_score: 0.9,
            grounding_reply: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Default for StubCompleter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatCompleter for StubCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = request.system_prompt.clone().unwrap_or_default();

        let content = if system.contains("grounded") {
            self.grounding_reply.clone().unwrap_or_else(|| {
                format!(
                    r#"{{"grounding_score": 0.9, "is_grounded": true,
                        "supported_claims": ["RAG combines retrieval with generation"],
                        "unsupported_claims": [],
                        "citations": [{{"chunk_index": 0, "quote": "RAG combines retrieval", "relevance_score": {}}}]}}"#,
                    self.relevance_score
                )
            })
        } else if system.contains("relevant") {
            format!(r#"{{"score": {}, "explanation": "on topic"}}"#, self.relevance_score)
        } else {
            self.answer.clone()
        };

        Ok(Completion {
            content,
            model: "stub-llm".to_string(),
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            },
        })
    }
}

/// Reranker double: scripted ordering or permanent fallback.
pub enum StubReranker {
    /// (candidate index, relevance score) pairs returned verbatim.
    Script(Vec<(usize, f32)>),
    /// Behaves like the real client after exhausted retries.
    Fallback,
}

#[async_trait]
impl Reranker for StubReranker {
    async fn rerank(&self, _query: &str, documents: &[String], top_n: usize) -> Vec<RerankResult> {
        match self {
            StubReranker::Script(script) => script
                .iter()
                .filter(|(index, _)| *index < documents.len())
                .take(top_n)
                .map(|(index, score)| RerankResult {
                    index: *index,
                    relevance_score: *score,
                })
                .collect(),
            StubReranker::Fallback => (0..documents.len().min(top_n))
                .map(|index| RerankResult {
                    index,
                    relevance_score: NOT_RERANKED,
                })
                .collect(),
        }
    }
}

pub struct TestHarness {
    pub repository: Arc<Repository>,
    pub vector_store: Arc<MemoryVectorStore>,
    pub embedder: Arc<StubEmbedder>,
    pub completer: Arc<StubCompleter>,
    pub ingestion: Arc<IngestionService>,
    pub search: Arc<SearchService>,
    pub ask: Arc<AskService>,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::build(
            Arc::new(StubEmbedder::new(DIMENSION)),
            StubReranker::Fallback,
        )
        .await
    }

    pub async fn with_reranker(reranker: StubReranker) -> Self {
        Self::build(Arc::new(StubEmbedder::new(DIMENSION)), reranker).await
    }

    pub async fn with_embedder(embedder: StubEmbedder) -> Self {
        Self::build(Arc::new(embedder), StubReranker::Fallback).await
    }

    async fn build(embedder: Arc<StubEmbedder>, reranker: StubReranker) -> Self {
        let pool = DbPool::new_in_memory().await.unwrap();
        let repository = Arc::new(Repository::new(pool));
        repository.init_schema().await.unwrap();

        let vector_store = Arc::new(MemoryVectorStore::new());
        let completer = Arc::new(StubCompleter::new());
        let limiters = Arc::new(Limiters::new(4, 4, 3, Duration::from_secs(5)));
        let lock_manager = Arc::new(DocumentLockManager::new(Duration::from_secs(300)));

        let chunking = ChunkingConfig {
            chunk_size: 512,
            chunk_overlap: 50,
            min_chunk_size: 100,
        };

        let ingestion = Arc::new(IngestionService::new(
            repository.clone(),
            vector_store.clone(),
            embedder.clone(),
            completer.clone(),
            lock_manager,
            chunking,
            IngestionConfig {
                upload_dir: std::env::temp_dir(),
                allowed_base_dirs: Vec::new(),
                auto_summary: false,
                auto_tags: false,
            },
        ));

        let expander = Arc::new(QueryExpander::new(completer.clone(), false));
        let hyde = Arc::new(HydeGenerator::new(completer.clone(), false));

        let search = Arc::new(SearchService::new(
            embedder.clone(),
            Arc::new(reranker),
            vector_store.clone(),
            repository.clone(),
            expander,
            hyde,
            SearchConfig {
                limit: 10,
                threshold: 0.3,
            },
            RerankConfig {
                enabled: false,
                top_n: 10,
                candidate_multiplier: 4,
            },
        ));

        let verification = Arc::new(VerificationService::new(
            completer.clone(),
            limiters,
            &VerificationConfig {
                enabled: true,
                relevance_threshold: 0.6,
                grounding_threshold: 0.7,
                cache_ttl: Duration::from_secs(300),
                max_parallel_calls: 3,
            },
            Duration::from_secs(30),
        ));

        let ask = Arc::new(AskService::new(
            search.clone(),
            completer.clone(),
            verification,
            repository.clone(),
        ));

        let dir = tempfile::tempdir().unwrap();

        Self {
            repository,
            vector_store,
            embedder,
            completer,
            ingestion,
            search,
            ask,
            dir,
        }
    }

    /// Write a file into the harness temp dir and return its path string.
    pub fn write_file(&self, name: &str, contents: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().to_string()
    }

    /// Insert a hand-built vector point (bypassing ingestion).
    pub async fn seed_point(
        &self,
        document_id: Uuid,
        chunk_index: i64,
        content: &str,
        vector: Vec<f32>,
    ) -> Uuid {
        let chunk_id = Uuid::new_v4();
        self.vector_store
            .upsert_vectors(&[VectorPoint {
                id: chunk_id,
                vector,
                payload: VectorPayload {
                    chunk_id,
                    document_id,
                    content: content.to_string(),
                    chunk_index,
                    filename: "seeded.md".to_string(),
                    filepath: "/seeded.md".to_string(),
                    file_type: "md".to_string(),
                    metadata: Default::default(),
                },
            }])
            .await
            .unwrap();
        chunk_id
    }
}
