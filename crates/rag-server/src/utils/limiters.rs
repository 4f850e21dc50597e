use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::utils::error::AppError;

/// Semaphores bounding concurrent external calls.
#[derive(Clone)]
pub struct Limiters {
    pub embedding: Arc<Semaphore>,
    pub llm: Arc<Semaphore>,
    pub relevance: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(
        embedding_concurrency: usize,
        llm_concurrency: usize,
        relevance_concurrency: usize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            embedding: Arc::new(Semaphore::new(embedding_concurrency.max(1))),
            llm: Arc::new(Semaphore::new(llm_concurrency.max(1))),
            relevance: Arc::new(Semaphore::new(relevance_concurrency.max(1))),
            acquire_timeout,
        }
    }

    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration), AppError> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| AppError::Timeout(format!("limiter acquire timeout for op={}", op)))?
            .map_err(|_| AppError::Internal(format!("limiter closed for op={}", op)))?;

        Ok((permit, start.elapsed()))
    }
}
