use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter keyed by client identifier.
pub struct SlidingWindowRateLimiter {
    window: Duration,
    max_requests: usize,
    hits: DashMap<String, Vec<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            hits: DashMap::new(),
        }
    }

    /// Record an attempt for `key`; returns false when the window is full.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.hits.entry(key.to_string()).or_default();

        entry.retain(|t| now.duration_since(*t) < self.window);

        if entry.len() >= self.max_requests {
            return false;
        }

        entry.push(now);
        true
    }

    pub fn reset(&self, key: &str) {
        self.hits.remove(key);
    }
}
