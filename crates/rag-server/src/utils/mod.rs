pub mod error;
pub mod limiters;
pub mod locks;
pub mod lru;
pub mod rate_limit;
pub mod retry;
pub mod sanitize;
pub mod token_estimator;
pub mod validate;
