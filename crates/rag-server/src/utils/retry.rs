use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::utils::error::AppError;

/// Message fragments that mark an error as transient even when its kind
/// does not already say so.
const RETRYABLE_PATTERNS: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "fetch failed",
    "network",
    "429",
    "502",
    "503",
    "504",
];

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before attempt `attempt` (1-based), with 0-30% jitter added.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = 1.0 + rand::rng().random_range(0.0..0.3);
        Duration::from_millis((capped * jitter) as u64)
    }
}

fn is_retryable(err: &AppError) -> bool {
    if err.is_retryable() {
        return true;
    }
    let msg = err.to_string();
    RETRYABLE_PATTERNS.iter().any(|p| msg.contains(p))
}

/// Run `op` up to `1 + policy.max_retries` times with exponential backoff.
///
/// Non-retryable errors propagate immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    op_name, attempt, policy.max_retries, delay, err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
