//! Rate-limit filter.
//!
//! Checks the IP-scoped counter, then the user-scoped counter when the
//! request already carries an identity. Passing responses get the
//! `X-RateLimit-*` headers for the IP counter.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

use super::{AuthenticatedUser, Filter, client_info};
use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::policy::normalize_path;
use crate::rate_limit::{EndpointClass, RateLimitInfo, RateLimitScope, RateLimiter};

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const WARNING: HeaderName = HeaderName::from_static("x-ratelimit-warning");

/// Message returned in 429 bodies.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Fixed-window limiter mounted in the chain.
pub struct RateLimitFilter {
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl RateLimitFilter {
    /// Create the filter.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, audit: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter,
            audit,
            clock,
        }
    }

    /// `path` must already be normalized.
    fn is_exempt(&self, path: &str) -> bool {
        let config = self.limiter.config();
        !config.enabled || config.exempt_paths.iter().any(|p| normalize_path(p) == path)
    }

    /// Run the check on its own task so the counter update completes even if
    /// the client disconnects mid-request. A panic in the check allows the
    /// request.
    async fn exceeded(&self, scope: &RateLimitScope, class: EndpointClass) -> bool {
        let limiter = Arc::clone(&self.limiter);
        let scope = scope.clone();
        match tokio::spawn(async move { limiter.is_exceeded(&scope, class).await }).await {
            Ok(exceeded) => exceeded,
            Err(e) => {
                error!(error = %e, "Rate limit check aborted, allowing request");
                false
            }
        }
    }

    fn reject(
        &self,
        scope: &RateLimitScope,
        class: EndpointClass,
        info: Option<RateLimitInfo>,
        request: &Request<Body>,
    ) -> Response {
        let client = client_info(request);
        let audit = Arc::clone(&self.audit);
        let identifier = scope.value().to_string();
        let kind = scope.kind();
        tokio::spawn(async move {
            audit
                .rate_limit_exceeded(&identifier, &client, class.as_str(), kind)
                .await;
        });

        warn!(scope = kind, endpoint = %class, path = %request.uri().path(), "Request rejected by rate limit");
        let retry_after = info.map_or(1, |i| i.ttl_remaining_secs.max(1));
        let body = json!({
            "error": "Rate limit exceeded",
            "message": RATE_LIMIT_MESSAGE,
            "type": kind,
            "endpoint": class.as_str(),
            "timestamp": self.clock.now_millis(),
        });
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(body),
        )
            .into_response()
    }

    fn apply_headers(&self, response: &mut Response, info: RateLimitInfo) {
        let headers = response.headers_mut();
        headers.insert(LIMIT, HeaderValue::from(info.max));
        headers.insert(REMAINING, HeaderValue::from(info.remaining));
        headers.insert(RESET, HeaderValue::from(info.reset_at));
        if info.remaining <= self.limiter.config().warning_threshold {
            headers.insert(WARNING, HeaderValue::from_static("Rate limit approaching"));
        }
    }
}

#[async_trait::async_trait]
impl Filter for RateLimitFilter {
    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let path = normalize_path(request.uri().path());
        if self.is_exempt(&path) {
            return next.run(request).await;
        }

        let class = EndpointClass::classify(&path);
        let ip_scope = RateLimitScope::Ip(super::client_ip(&request));

        if self.exceeded(&ip_scope, class).await {
            let info = self.limiter.info(&ip_scope, class).await;
            return self.reject(&ip_scope, class, info, &request);
        }

        if let Some(user) = request.extensions().get::<AuthenticatedUser>() {
            let user_scope = RateLimitScope::User(user.username.clone());
            if self.exceeded(&user_scope, class).await {
                let info = self.limiter.info(&user_scope, class).await;
                return self.reject(&user_scope, class, info, &request);
            }
        }

        let info = self.limiter.info(&ip_scope, class).await;
        let mut response = next.run(request).await;
        match info {
            Some(info) => self.apply_headers(&mut response, info),
            None => debug!(path = %path, "Rate limit headers skipped"),
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{AuditConfig, RateLimitConfig};
    use crate::store::InMemoryStore;
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    fn app(config: RateLimitConfig) -> Router {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let limiter = Arc::new(RateLimiter::new(store.clone(), config, clock.clone()));
        let audit = Arc::new(AuditLog::new(store, AuditConfig::default(), clock.clone()));
        let filter = Arc::new(RateLimitFilter::new(limiter, audit, clock));
        Router::new()
            .route("/api/auth/login", get(|| async { "ok" }))
            .route("/api/auth/login/", get(|| async { "ok" }))
            .route("/actuator/health", get(|| async { "up" }))
            .route("/actuator/health/", get(|| async { "up" }))
            .layer(from_fn_with_state(filter, super::super::run::<RateLimitFilter>))
    }

    fn get_from(path: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn passing_request_carries_headers() {
        let app = app(RateLimitConfig::default());
        let response = app.oneshot(get_from("/api/auth/login", "10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "4");
        assert_eq!(headers["x-ratelimit-reset"], (1_700_000_000u64 + 300).to_string().as_str());
        assert_eq!(headers["x-ratelimit-warning"], "Rate limit approaching");
    }

    #[tokio::test]
    async fn sixth_login_is_rejected_with_ip_type() {
        let app = app(RateLimitConfig::default());
        for _ in 0..5 {
            let response = app.clone().oneshot(get_from("/api/auth/login", "10.0.0.2")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(get_from("/api/auth/login", "10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "300");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["type"], "IP");
        assert_eq!(body["endpoint"], "login");
        assert_eq!(body["timestamp"], 1_700_000_000_000u64);
    }

    #[tokio::test]
    async fn exempt_paths_skip_counting() {
        let app = app(RateLimitConfig::default());
        for _ in 0..200 {
            let response = app.clone().oneshot(get_from("/actuator/health", "10.0.0.3")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn exempt_paths_ignore_trailing_slash() {
        let app = app(RateLimitConfig::default());
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(get_from("/actuator/health/", "10.0.0.5"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn trailing_slash_shares_the_login_counter() {
        let app = app(RateLimitConfig::default());
        for path in ["/api/auth/login", "/api/auth/login/"].repeat(3).into_iter().take(5) {
            let response = app.clone().oneshot(get_from(path, "10.0.0.6")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(get_from("/api/auth/login/", "10.0.0.6")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn disabled_limiter_passes_everything() {
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let app = app(config);
        for _ in 0..10 {
            let response = app.clone().oneshot(get_from("/api/auth/login", "10.0.0.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
