pub mod ask_service;
pub mod embedding_service;
pub mod hyde;
pub mod ingestion_service;
pub mod llm_service;
pub mod query_expander;
pub mod reranker_service;
pub mod search_service;
pub mod verification;

pub use ask_service::{AskMetadata, AskRequest, AskResponse, AskService};
pub use embedding_service::{Embedder, EmbeddingBatch, EmbeddingClient};
pub use hyde::HydeGenerator;
pub use ingestion_service::{IngestOptions, IngestionResult, IngestionService};
pub use llm_service::{ChatCompleter, Completion, CompletionRequest, LlmClient};
pub use query_expander::QueryExpander;
pub use reranker_service::{RerankClient, RerankResult, Reranker, NOT_RERANKED};
pub use search_service::{SearchOutcome, SearchRequest, SearchService};
pub use verification::{GroundingVerifier, PipelineOutcome, RelevanceFilter, VerificationService};
