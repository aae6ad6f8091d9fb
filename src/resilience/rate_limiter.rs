//! Adaptive Rate Limiter
//!
//! Fixed-window request budgets per integration key. Each window's limit is
//! recomputed from the key's error rate in the completed window: above 10%
//! the base limit halves, above 5% it drops to three quarters.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests allowed per window at a healthy error rate.
    pub base_limit: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base limit per window.
    pub fn base_limit(mut self, n: u32) -> Self {
        self.base_limit = n;
        self
    }

    /// Set the window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Outcome of a limit check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests remaining in the current window.
    pub remaining: u32,
    /// When the current window resets.
    pub reset_at: Instant,
    /// Seconds until reset; present only on denial.
    pub retry_after: Option<Duration>,
}

struct KeyState {
    window_start: Instant,
    effective_limit: u32,
    /// Requests admitted in the current window.
    admitted: u32,
    /// Outcomes recorded in the current window.
    successes: u32,
    failures: u32,
}

impl KeyState {
    fn new(base_limit: u32) -> Self {
        Self {
            window_start: Instant::now(),
            effective_limit: base_limit,
            admitted: 0,
            successes: 0,
            failures: 0,
        }
    }

    fn error_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            return 0.0;
        }
        self.failures as f64 / total as f64
    }

    /// Roll the window if it has elapsed, recomputing the effective limit
    /// from the completed window's error rate.
    fn roll_if_elapsed(&mut self, config: &RateLimiterConfig) {
        let now = Instant::now();
        if now.duration_since(self.window_start) < config.window {
            return;
        }

        let error_rate = self.error_rate();
        self.effective_limit = adaptive_limit(config.base_limit, error_rate);
        self.window_start = now;
        self.admitted = 0;
        self.successes = 0;
        self.failures = 0;
    }
}

/// Effective limit for a window given the previous window's error rate.
pub fn adaptive_limit(base_limit: u32, error_rate: f64) -> u32 {
    if error_rate > 0.10 {
        (base_limit / 2).max(1)
    } else if error_rate > 0.05 {
        (base_limit * 3 / 4).max(1)
    } else {
        base_limit
    }
}

/// Adaptive fixed-window rate limiter keyed by integration key.
///
/// The outer map lock covers entry insertion only; checks and outcome
/// recording take the per-key lock, so unrelated keys never contend.
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    keys: RwLock<HashMap<String, Arc<Mutex<KeyState>>>>,
}

impl AdaptiveRateLimiter {
    /// Create a limiter from a configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            keys: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Arc<Mutex<KeyState>> {
        if let Some(entry) = self.keys.read().get(key) {
            return entry.clone();
        }
        self.keys
            .write()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::new(self.config.base_limit))))
            .clone()
    }

    /// Check whether a request under `key` may proceed in the current window.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let entry = self.entry(key);
        let mut state = entry.lock();
        state.roll_if_elapsed(&self.config);

        let reset_at = state.window_start + self.config.window;

        if state.admitted < state.effective_limit {
            state.admitted += 1;
            RateLimitDecision {
                allowed: true,
                remaining: state.effective_limit - state.admitted,
                reset_at,
                retry_after: None,
            }
        } else {
            let retry_after = reset_at.saturating_duration_since(Instant::now());
            debug!(key, retry_after_secs = retry_after.as_secs(), "rate limit denied");
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                retry_after: Some(retry_after),
            }
        }
    }

    /// Record a call outcome for `key`, feeding the adaptive error rate.
    pub fn record_outcome(&self, key: &str, success: bool) {
        let entry = self.entry(key);
        let mut state = entry.lock();
        if success {
            state.successes += 1;
        } else {
            state.failures += 1;
        }
    }

    /// Effective limit for `key` in its current window.
    pub fn effective_limit(&self, key: &str) -> u32 {
        let entry = self.entry(key);
        let mut state = entry.lock();
        state.roll_if_elapsed(&self.config);
        state.effective_limit
    }
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("config", &self.config)
            .field("keys", &self.keys.read().len())
            .finish()
    }
}
