use std::sync::Arc;

use crate::config::Settings;
use crate::database::Repository;
use crate::services::{
    AskService, HydeGenerator, IngestionService, QueryExpander, SearchService,
};
use crate::utils::rate_limit::SlidingWindowRateLimiter;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
    pub ingestion: Arc<IngestionService>,
    pub search: Arc<SearchService>,
    pub ask: Arc<AskService>,
    pub expander: Arc<QueryExpander>,
    pub hyde: Arc<HydeGenerator>,
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
    pub settings: Settings,
}
