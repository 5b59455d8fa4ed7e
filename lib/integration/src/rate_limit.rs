//! Rate limiting for worker throughput.
//!
//! Bounds how many jobs start per window so downstream RPC, exchange and
//! chat endpoints stay within their own limits.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration in milliseconds.
    pub window_millis: u64,
}

impl RateLimitConfig {
    /// Creates a new rate limit configuration.
    #[must_use]
    pub fn new(max_requests: u32, window_millis: u64) -> Self {
        Self {
            max_requests,
            window_millis,
        }
    }

    /// Requests per second.
    #[must_use]
    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, 1_000)
    }

    fn window(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.window_millis).unwrap_or(i64::MAX))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(10)
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed {
        remaining: u32,
        resets_at: DateTime<Utc>,
    },
    /// Rate limit exceeded.
    Exceeded {
        retry_after: Duration,
        resets_at: DateTime<Utc>,
    },
}

impl RateLimitResult {
    /// Returns true if the request is allowed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Returns the number of remaining requests (0 if exceeded).
    #[must_use]
    pub fn remaining(&self) -> u32 {
        match self {
            Self::Allowed { remaining, .. } => *remaining,
            Self::Exceeded { .. } => 0,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowState {
    count: u32,
    window_start: DateTime<Utc>,
}

/// Fixed-window rate limiter keyed by an arbitrary string.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Arc<RwLock<HashMap<String, WindowState>>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Checks if a request is allowed for the given key.
    ///
    /// If allowed, increments the request count.
    pub fn check_and_increment(&self, key: &str) -> RateLimitResult {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let window = self.config.window();

        let window_state = state.entry(key.to_string()).or_insert_with(|| WindowState {
            count: 0,
            window_start: now,
        });

        if now - window_state.window_start >= window {
            window_state.window_start = now;
            window_state.count = 0;
        }

        let resets_at = window_state.window_start + window;

        if window_state.count >= self.config.max_requests {
            return RateLimitResult::Exceeded {
                retry_after: resets_at - now,
                resets_at,
            };
        }

        window_state.count += 1;
        RateLimitResult::Allowed {
            remaining: self.config.max_requests - window_state.count,
            resets_at,
        }
    }

    /// Waits until a request is allowed for the key, then takes a slot.
    pub async fn acquire(&self, key: &str) {
        loop {
            match self.check_and_increment(key) {
                RateLimitResult::Allowed { .. } => return,
                RateLimitResult::Exceeded { retry_after, .. } => {
                    let wait = retry_after
                        .to_std()
                        .unwrap_or(std::time::Duration::from_millis(1));
                    trace!(key, wait_ms = wait.as_millis(), "rate limited, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_allows_under_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 60_000));

        for i in 0..10 {
            let result = limiter.check_and_increment("jobs");
            assert!(result.is_allowed());
            assert_eq!(result.remaining(), 10 - i - 1);
        }
    }

    #[test]
    fn rate_limit_blocks_over_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 60_000));

        for _ in 0..5 {
            assert!(limiter.check_and_increment("jobs").is_allowed());
        }

        let result = limiter.check_and_increment("jobs");
        assert!(!result.is_allowed());
        assert_eq!(result.remaining(), 0);
    }

    #[test]
    fn rate_limit_per_key_isolation() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, 60_000));

        limiter.check_and_increment("rpc");
        limiter.check_and_increment("rpc");

        assert!(!limiter.check_and_increment("rpc").is_allowed());
        assert!(limiter.check_and_increment("discord").is_allowed());
    }

    #[test]
    fn clones_share_state() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 60_000));
        let clone = limiter.clone();

        assert!(limiter.check_and_increment("jobs").is_allowed());
        assert!(!clone.check_and_increment("jobs").is_allowed());
    }

    #[tokio::test]
    async fn acquire_waits_for_next_window() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 50));

        let started = std::time::Instant::now();
        limiter.acquire("jobs").await;
        limiter.acquire("jobs").await;

        assert!(started.elapsed() >= std::time::Duration::from_millis(40));
    }
}
