use anyhow::Result;
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Flat environment keys as they arrive from `config::Environment`
/// (env var names lowercased).
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default = "default_host")]
    server_host: String,
    #[serde(default = "default_port")]
    server_port: u16,

    #[serde(default = "default_qdrant_url")]
    qdrant_url: String,
    #[serde(default = "default_qdrant_collection")]
    qdrant_collection: String,
    #[serde(default = "default_vector_size")]
    vector_size: usize,

    litellm_api_key: Option<String>,
    #[serde(default = "default_litellm_base_url")]
    litellm_base_url: String,
    #[serde(default = "default_litellm_timeout")]
    litellm_timeout: u64,
    #[serde(default = "default_embedding_model")]
    embedding_model: String,
    #[serde(default = "default_llm_model")]
    llm_model: String,
    #[serde(default = "default_reranker_model")]
    reranker_model: String,

    #[serde(default = "default_sqlite_path")]
    sqlite_path: String,
    #[serde(default = "default_upload_dir")]
    upload_dir: String,
    /// Comma-separated allow-list of ingestion base directories; empty
    /// disables the check.
    #[serde(default)]
    allowed_base_dirs: String,

    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    chunk_overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    min_chunk_size: usize,

    #[serde(default = "default_search_limit")]
    search_limit: usize,
    #[serde(default = "default_search_threshold")]
    search_threshold: f32,

    #[serde(default = "default_true")]
    reranking_enabled: bool,
    #[serde(default = "default_rerank_top_n")]
    rerank_top_n: usize,
    #[serde(default = "default_rerank_candidates")]
    rerank_candidates: usize,

    #[serde(default)]
    query_expansion: bool,
    #[serde(default)]
    hyde_enabled: bool,
    #[serde(default)]
    auto_summary: bool,
    #[serde(default)]
    auto_tags: bool,

    #[serde(default = "default_true")]
    verification_enabled: bool,
    #[serde(default = "default_relevance_threshold")]
    relevance_threshold: f32,
    #[serde(default = "default_grounding_threshold")]
    grounding_threshold: f32,
    #[serde(default = "default_verification_cache_ttl")]
    verification_cache_ttl_ms: u64,
    #[serde(default = "default_max_parallel_calls")]
    max_parallel_calls: usize,

    #[serde(default = "default_rate_limit")]
    rate_limit_per_minute: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_qdrant_collection() -> String {
    "documents".to_string()
}
fn default_vector_size() -> usize {
    1024
}
fn default_litellm_base_url() -> String {
    "http://localhost:4000".to_string()
}
fn default_litellm_timeout() -> u64 {
    30_000
}
fn default_embedding_model() -> String {
    "bge-m3".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_reranker_model() -> String {
    "bge-reranker-v2-m3".to_string()
}
fn default_sqlite_path() -> String {
    "./data/rag.db".to_string()
}
fn default_upload_dir() -> String {
    "./uploads".to_string()
}
fn default_chunk_size() -> usize {
    512
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_search_limit() -> usize {
    10
}
fn default_search_threshold() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_rerank_top_n() -> usize {
    10
}
fn default_rerank_candidates() -> usize {
    4
}
fn default_relevance_threshold() -> f32 {
    0.6
}
fn default_grounding_threshold() -> f32 {
    0.7
}
fn default_verification_cache_ttl() -> u64 {
    300_000
}
fn default_max_parallel_calls() -> usize {
    3
}
fn default_rate_limit() -> usize {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub vector_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteLlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub embedding_model: String,
    pub llm_model: String,
    pub reranker_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub limit: usize,
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub enabled: bool,
    pub top_n: usize,
    /// Factor widening the ANN candidate pool when reranking will narrow it.
    pub candidate_multiplier: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancerConfig {
    pub query_expansion: bool,
    pub hyde_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub relevance_threshold: f32,
    pub grounding_threshold: f32,
    pub cache_ttl: Duration,
    pub max_parallel_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub upload_dir: PathBuf,
    pub allowed_base_dirs: Vec<PathBuf>,
    pub auto_summary: bool,
    pub auto_tags: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_minute: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub qdrant: QdrantConfig,
    pub litellm: LiteLlmConfig,
    pub sqlite: SqliteConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub rerank: RerankConfig,
    pub enhancers: EnhancerConfig,
    pub verification: VerificationConfig,
    pub ingestion: IngestionConfig,
    pub rate_limit: RateLimitConfig,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let raw: RawSettings = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()?;

        let settings = Self::from_raw(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let api_key = raw
            .litellm_api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("LITELLM_API_KEY is required"))?;

        let allowed_base_dirs = raw
            .allowed_base_dirs
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();

        Ok(Self {
            server: ServerConfig {
                host: raw.server_host,
                port: raw.server_port,
            },
            qdrant: QdrantConfig {
                url: raw.qdrant_url.trim_end_matches('/').to_string(),
                collection: raw.qdrant_collection,
                vector_size: raw.vector_size,
            },
            litellm: LiteLlmConfig {
                api_key,
                base_url: raw.litellm_base_url.trim_end_matches('/').to_string(),
                timeout: Duration::from_millis(raw.litellm_timeout),
                embedding_model: raw.embedding_model,
                llm_model: raw.llm_model,
                reranker_model: raw.reranker_model,
            },
            sqlite: SqliteConfig {
                path: raw.sqlite_path,
            },
            chunking: ChunkingConfig {
                chunk_size: raw.chunk_size,
                chunk_overlap: raw.chunk_overlap,
                min_chunk_size: raw.min_chunk_size,
            },
            search: SearchConfig {
                limit: raw.search_limit,
                threshold: raw.search_threshold,
            },
            rerank: RerankConfig {
                enabled: raw.reranking_enabled,
                top_n: raw.rerank_top_n,
                candidate_multiplier: raw.rerank_candidates,
            },
            enhancers: EnhancerConfig {
                query_expansion: raw.query_expansion,
                hyde_enabled: raw.hyde_enabled,
            },
            verification: VerificationConfig {
                enabled: raw.verification_enabled,
                relevance_threshold: raw.relevance_threshold,
                grounding_threshold: raw.grounding_threshold,
                cache_ttl: Duration::from_millis(raw.verification_cache_ttl_ms),
                max_parallel_calls: raw.max_parallel_calls,
            },
            ingestion: IngestionConfig {
                upload_dir: PathBuf::from(raw.upload_dir),
                allowed_base_dirs,
                auto_summary: raw.auto_summary,
                auto_tags: raw.auto_tags,
            },
            rate_limit: RateLimitConfig {
                per_minute: raw.rate_limit_per_minute,
            },
        })
    }

    fn validate(&self) -> Result<()> {
        fn check(name: &str, value: usize, min: usize, max: usize) -> Result<()> {
            if value < min || value > max {
                anyhow::bail!("{} must be in [{}, {}], got {}", name, min, max, value);
            }
            Ok(())
        }

        check("VECTOR_SIZE", self.qdrant.vector_size, 64, 4096)?;
        check(
            "LITELLM_TIMEOUT",
            self.litellm.timeout.as_millis() as usize,
            1_000,
            300_000,
        )?;
        check("CHUNK_SIZE", self.chunking.chunk_size, 50, 10_000)?;
        check("CHUNK_OVERLAP", self.chunking.chunk_overlap, 0, 1_000)?;
        check("MIN_CHUNK_SIZE", self.chunking.min_chunk_size, 10, 1_000)?;
        check("SEARCH_LIMIT", self.search.limit, 1, 100)?;
        check("RERANK_TOP_N", self.rerank.top_n, 1, 50)?;
        check("RERANK_CANDIDATES", self.rerank.candidate_multiplier, 1, 20)?;

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        Ok(())
    }
}
