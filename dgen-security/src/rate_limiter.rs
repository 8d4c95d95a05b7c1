//! Sliding-window rate limiter
//!
//! Counts attempts per key inside a window. Hitting the limit blocks the key
//! for a fixed duration, during which every check is rejected.

use crate::config::RateLimitConfig;
use crate::env::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// The attempt may proceed
    pub allowed: bool,
    /// Whole seconds until the block lifts, when rejected
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }

    fn reject(remaining_ms: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(remaining_ms.div_ceil(1000)),
        }
    }
}

#[derive(Debug, Default)]
struct RateLimitState {
    attempts: VecDeque<u64>,
    blocked_until: Option<u64>,
}

/// Per-key sliding-window limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    /// Create a limiter on the given clock
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Wallet unlock attempts on the system clock
    pub fn wallet_unlock() -> Self {
        Self::new(RateLimitConfig::wallet_unlock(), Arc::new(SystemClock))
    }

    /// Payment attempts on the system clock
    pub fn payment() -> Self {
        Self::new(RateLimitConfig::payment(), Arc::new(SystemClock))
    }

    /// Record an attempt for `key` and decide whether it may proceed
    pub fn check_limit(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let entry = state.entry(key.to_string()).or_default();

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateLimitDecision::reject(until - now);
            }
            entry.blocked_until = None;
        }

        let window_start = now.saturating_sub(self.config.window_ms);
        while entry.attempts.front().is_some_and(|&ts| ts <= window_start) {
            entry.attempts.pop_front();
        }

        if entry.attempts.len() >= self.config.max_attempts {
            entry.blocked_until = Some(now.saturating_add(self.config.block_duration_ms));
            warn!(
                key = %key,
                attempts = entry.attempts.len(),
                "Rate limit exceeded, blocking"
            );
            return RateLimitDecision::reject(self.config.block_duration_ms);
        }

        entry.attempts.push_back(now);
        RateLimitDecision::allow()
    }

    /// Forget history and any block for `key`
    pub fn reset(&self, key: &str) {
        self.state.lock().remove(key);
    }

    /// Limiter settings
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
