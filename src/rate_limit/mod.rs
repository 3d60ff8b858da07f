//! Fixed-window request rate limiting over the shared store.
//!
//! Counters are keyed by `(scope, endpoint class)`:
//!
//! | class | max requests | window |
//! |-------|--------------|--------|
//! | `login` | 5 | 300s |
//! | `api` | 1000 | 3600s |
//! | `default` | 100 | 60s |
//!
//! A counter is created by the first hit in a window, incremented by every
//! accepted hit and disappears when the window elapses. Rejected hits do not
//! inflate the counter. If the store is unavailable the limiter fails open.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::config::{RateLimitConfig, RateLimitTier};
use crate::store::{BoundedIncrement, KvStore};

/// Key namespace for rate-limit counters.
pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// Endpoint class used to pick a threshold and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    /// `/api/auth/login*`
    Login,
    /// Any other `/api/*` path
    Api,
    /// Everything else
    Default,
}

impl EndpointClass {
    /// Every class, in table order.
    pub const ALL: [Self; 3] = [Self::Login, Self::Api, Self::Default];

    /// Classify a request path by prefix.
    #[must_use]
    pub fn classify(path: &str) -> Self {
        if path.starts_with("/api/auth/login") {
            Self::Login
        } else if path.starts_with("/api/") {
            Self::Api
        } else {
            Self::Default
        }
    }

    /// Lowercase name used in keys and response bodies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Api => "api",
            Self::Default => "default",
        }
    }

    /// Parse a lowercase class name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a counter belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    /// Client IP address
    Ip(String),
    /// Authenticated username
    User(String),
}

impl RateLimitScope {
    /// `"IP"` or `"User"`, as reported in 429 bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ip(_) => "IP",
            Self::User(_) => "User",
        }
    }

    /// The IP address or username.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Ip(v) | Self::User(v) => v,
        }
    }

    fn key(&self, class: EndpointClass) -> String {
        let kind = match self {
            Self::Ip(_) => "ip",
            Self::User(_) => "user",
        };
        format!("{RATE_LIMIT_PREFIX}{kind}:{}:{}", self.value(), class.as_str())
    }
}

/// Read-only snapshot of a counter, used for response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    /// Hits counted in the current window
    pub current: u64,
    /// Threshold for the class
    pub max: u64,
    /// Hits left before rejection
    pub remaining: u64,
    /// Seconds until the window resets (0 when no window is open)
    pub ttl_remaining_secs: u64,
    /// Unix seconds at which the window resets
    pub reset_at: u64,
}

/// Fixed-window rate limiter.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Threshold and window for a class.
    #[must_use]
    pub fn tier(&self, class: EndpointClass) -> RateLimitTier {
        self.config.tier(class)
    }

    /// Count this hit and report whether the limit is exceeded.
    ///
    /// Returns `true` without incrementing when the counter already reached
    /// the threshold. Returns `false` (allow) when the store is unavailable.
    pub async fn is_exceeded(&self, scope: &RateLimitScope, class: EndpointClass) -> bool {
        let tier = self.tier(class);
        let key = scope.key(class);
        match self
            .store
            .increment_below(&key, tier.max_requests, Duration::from_secs(tier.window_secs))
            .await
        {
            Ok(BoundedIncrement::Incremented(counter)) => {
                debug!(key = %key, count = counter.count, max = tier.max_requests, "Rate limit hit counted");
                false
            }
            Ok(BoundedIncrement::AtLimit(counter)) => {
                warn!(
                    scope = scope.kind(),
                    endpoint = %class,
                    count = counter.count,
                    max = tier.max_requests,
                    "Rate limit exceeded"
                );
                true
            }
            Err(e) => {
                error!(error = %e, key = %key, "Rate limit check failed, allowing request");
                false
            }
        }
    }

    /// Snapshot of a counter. Never mutates state.
    ///
    /// Returns `None` when the store is unavailable.
    pub async fn info(&self, scope: &RateLimitScope, class: EndpointClass) -> Option<RateLimitInfo> {
        let tier = self.tier(class);
        let now_ms = self.clock.now_millis();
        let counter = match self.store.counter(&scope.key(class)).await {
            Ok(counter) => counter,
            Err(e) => {
                error!(error = %e, "Rate limit snapshot failed");
                return None;
            }
        };

        let (current, expires_at_ms) = counter.map_or((0, now_ms), |c| (c.count, c.expires_at_ms));
        let ttl_ms = expires_at_ms.saturating_sub(now_ms);
        Some(RateLimitInfo {
            current,
            max: tier.max_requests,
            remaining: tier.max_requests.saturating_sub(current),
            ttl_remaining_secs: ttl_ms.div_ceil(1000),
            reset_at: expires_at_ms.div_ceil(1000),
        })
    }

    /// Delete a counter outright.
    pub async fn reset(&self, scope: &RateLimitScope, class: EndpointClass) {
        match self.store.delete(&scope.key(class)).await {
            Ok(existed) => debug!(scope = scope.kind(), endpoint = %class, existed, "Rate limit counter reset"),
            Err(e) => error!(error = %e, "Failed to reset rate limit counter"),
        }
    }
}
