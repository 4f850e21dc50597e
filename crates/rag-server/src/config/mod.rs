pub mod settings;

pub use settings::{
    ChunkingConfig, EnhancerConfig, IngestionConfig, LiteLlmConfig, QdrantConfig, RateLimitConfig,
    RerankConfig, SearchConfig, ServerConfig, Settings, SqliteConfig, VerificationConfig,
};
