use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use rag_server::config::Settings;
use rag_server::database::{DbPool, Repository};
use rag_server::handlers;
use rag_server::services::{
    AskService, EmbeddingClient, HydeGenerator, IngestionService, LlmClient, QueryExpander,
    RerankClient, SearchService, VerificationService,
};
use rag_server::state::AppState;
use rag_server::utils::limiters::Limiters;
use rag_server::utils::locks::DocumentLockManager;
use rag_server::utils::rate_limit::SlidingWindowRateLimiter;
use rag_server::vector::{QdrantStore, VectorStore};

/// Per-document lock hold timeout; a wedged ingest frees its path after
/// this long.
const LOCK_HOLD_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting RAG server...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::new(&settings.sqlite).await?;
    let repository = Arc::new(Repository::new(db_pool));
    repository.init_schema().await?;
    info!("Metadata store ready at {}", settings.sqlite.path);

    let vector_store: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(&settings.qdrant));
    vector_store.ensure_collection().await?;
    info!(
        "Vector collection {} ready (dim={})",
        settings.qdrant.collection, settings.qdrant.vector_size
    );

    let limiters = Arc::new(Limiters::new(
        8,
        4,
        settings.verification.max_parallel_calls,
        Duration::from_secs(15),
    ));

    let embedder = Arc::new(EmbeddingClient::new(
        settings.litellm.clone(),
        settings.qdrant.vector_size,
        limiters.clone(),
    ));
    let reranker = Arc::new(RerankClient::new(settings.litellm.clone()));
    let completer = Arc::new(LlmClient::new(settings.litellm.clone(), limiters.clone()));

    let expander = Arc::new(QueryExpander::new(
        completer.clone(),
        settings.enhancers.query_expansion,
    ));
    let hyde = Arc::new(HydeGenerator::new(
        completer.clone(),
        settings.enhancers.hyde_enabled,
    ));

    let lock_manager = Arc::new(DocumentLockManager::new(LOCK_HOLD_TIMEOUT));

    let ingestion = Arc::new(IngestionService::new(
        repository.clone(),
        vector_store.clone(),
        embedder.clone(),
        completer.clone(),
        lock_manager,
        settings.chunking.clone(),
        settings.ingestion.clone(),
    ));

    let search = Arc::new(SearchService::new(
        embedder,
        reranker,
        vector_store,
        repository.clone(),
        expander.clone(),
        hyde.clone(),
        settings.search.clone(),
        settings.rerank.clone(),
    ));

    let verification = Arc::new(VerificationService::new(
        completer.clone(),
        limiters,
        &settings.verification,
        settings.litellm.timeout,
    ));

    let ask = Arc::new(AskService::new(
        search.clone(),
        completer,
        verification,
        repository.clone(),
    ));

    let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
        Duration::from_secs(60),
        settings.rate_limit.per_minute,
    ));

    let state = AppState {
        repository,
        ingestion,
        search,
        ask,
        expander,
        hyde,
        rate_limiter,
        settings: settings.clone(),
    };

    let app = build_router(state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/documents",
            post(handlers::documents::index_document_handler)
                .get(handlers::documents::list_documents_handler),
        )
        .route("/api/documents/text", post(handlers::documents::index_text_handler))
        .route(
            "/api/documents/{id}",
            get(handlers::documents::get_document_handler)
                .delete(handlers::documents::delete_document_handler),
        )
        .route("/api/search", post(handlers::search::search_handler))
        .route("/api/similar", post(handlers::search::similar_handler))
        .route("/api/ask", post(handlers::ask::ask_handler))
        .route(
            "/api/collections",
            post(handlers::collections::create_collection_handler)
                .get(handlers::collections::list_collections_handler),
        )
        .route(
            "/api/collections/{id}",
            delete(handlers::collections::delete_collection_handler),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
}
