pub mod ask;
pub mod collections;
pub mod documents;
pub mod health;
pub mod search;

use crate::state::AppState;
use crate::utils::error::AppError;

/// Boundary backpressure: per-operation sliding window.
pub(crate) fn check_rate_limit(state: &AppState, op: &str) -> Result<(), AppError> {
    if !state.rate_limiter.is_allowed(op) {
        return Err(AppError::Transient(format!(
            "Rate limit exceeded for {}, try again later",
            op
        )));
    }
    Ok(())
}
