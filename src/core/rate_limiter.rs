//! Rate limiting for the IdeaHub guard.
//!
//! Fixed-window counters kept in process memory, one budget per tier. Keys
//! combine the tier and the caller's source address.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::Serialize;
use thiserror::Error;
use crate::core::clock::Clock;
use crate::models::{RateLimitConfig, TierLimit};
use crate::utils::{format_rate_limit_key, is_auth_path, lock_or_recover};

/// Budget a request is charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitTier {
    Auth,
    Api,
    General,
}

impl RateLimitTier {
    /// Pick the tier for a request path
    pub fn classify(path: &str, api_prefix: &str) -> Self {
        if is_auth_path(path) {
            RateLimitTier::Auth
        } else if path.starts_with(api_prefix) {
            RateLimitTier::Api
        } else {
            RateLimitTier::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Auth => "auth",
            RateLimitTier::Api => "api",
            RateLimitTier::General => "general",
        }
    }
}

impl fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during rate limiting operations
#[derive(Error, Debug, PartialEq)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {tier} tier, retry after {retry_after_seconds}s")]
    ExceededLimit {
        tier: RateLimitTier,
        retry_after_seconds: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: DateTime<Utc>,
}

/// In-memory fixed-window rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Create a new rate limiter instance
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn limit(&self, tier: RateLimitTier) -> &TierLimit {
        match tier {
            RateLimitTier::Auth => &self.config.auth,
            RateLimitTier::Api => &self.config.api,
            RateLimitTier::General => &self.config.general,
        }
    }

    /// Charge one request from `key` against `tier`.
    ///
    /// # Returns
    ///
    /// * `Ok(remaining)` with the requests left in the current window
    /// * `Err(RateLimitError::ExceededLimit)` once the window's budget is spent
    pub fn check_rate_limit(&self, tier: RateLimitTier, key: &str) -> Result<u32, RateLimitError> {
        let limit = self.limit(tier);
        let window_length = Duration::seconds(i64::from(limit.window_seconds));
        let now = self.clock.now();

        let mut windows = lock_or_recover(&self.windows, "rate limit windows");
        let window = windows
            .entry(format_rate_limit_key(tier.as_str(), key))
            .or_insert(Window { count: 0, started: now });
        if now - window.started >= window_length {
            *window = Window { count: 0, started: now };
        }

        window.count = window.count.saturating_add(1);
        if window.count > limit.max_requests {
            let remaining = window_length - (now - window.started);
            let retry_after_seconds = remaining.num_seconds().max(1) as u64;
            debug!("Rate limit exceeded for {} on {} tier", key, tier);
            return Err(RateLimitError::ExceededLimit { tier, retry_after_seconds });
        }

        Ok(limit.max_requests - window.count)
    }

    /// Reset the rate limit for a given key
    pub fn reset_rate_limit(&self, tier: RateLimitTier, key: &str) {
        lock_or_recover(&self.windows, "rate limit windows")
            .remove(&format_rate_limit_key(tier.as_str(), key));
    }

    /// Drop windows that have ended. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let auth = Duration::seconds(i64::from(self.config.auth.window_seconds));
        let api = Duration::seconds(i64::from(self.config.api.window_seconds));
        let general = Duration::seconds(i64::from(self.config.general.window_seconds));
        let longest = auth.max(api).max(general);

        let mut windows = lock_or_recover(&self.windows, "rate limit windows");
        let before = windows.len();
        windows.retain(|_, window| now - window.started < longest);
        before - windows.len()
    }
}
