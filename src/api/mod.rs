//! HTTP surface: shared state, router assembly and handlers.

mod auth;
mod health;
mod security;

use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use serde::Serialize;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::Result;
use crate::audit::AuditLog;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::filter::{
    self, ErrorBodyFilter, RateLimitFilter, SecurityHeadersFilter, TokenAuthFilter, cors_layer,
};
use crate::policy::RoutePolicy;
use crate::rate_limit::RateLimiter;
use crate::store::{InMemoryStore, KvStore};
use crate::token::{RevocationStore, TokenService};
use crate::users::{
    Argon2Hasher, InMemoryUserDirectory, PasswordHasher, User, UserDirectory, hash_blocking,
    verify_blocking,
};

pub use auth::{LoginResponse, UserResponse};

/// Shared application state.
pub struct AppState {
    /// Process configuration
    pub config: Config,
    /// Shared store backing revocation, rate limits and audit
    pub store: Arc<dyn KvStore>,
    /// Token issuance and validation
    pub tokens: Arc<TokenService>,
    /// Fixed-window rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Security audit log
    pub audit: Arc<AuditLog>,
    /// User lookup collaborator
    pub users: Arc<dyn UserDirectory>,
    /// Credential hashing
    pub hasher: Arc<dyn PasswordHasher>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Hash checked when a login names an unknown user, so that path costs
    /// the same as a wrong password
    decoy_hash: String,
}

impl AppState {
    /// Wire every component over explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the token settings are invalid.
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        users: Arc<dyn UserDirectory>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let revocations = RevocationStore::new(Arc::clone(&store));
        let tokens = Arc::new(TokenService::from_config(
            &config.jwt,
            revocations,
            Arc::clone(&clock),
        )?);
        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::clone(&store),
            config.rate_limit.clone(),
            Arc::clone(&clock),
        ));
        let audit = Arc::new(AuditLog::new(
            Arc::clone(&store),
            config.audit.clone(),
            Arc::clone(&clock),
        ));

        let decoy_hash = hasher.hash(&uuid::Uuid::new_v4().to_string())?;

        Ok(Self {
            config,
            store,
            tokens,
            rate_limiter,
            audit,
            users,
            hasher,
            clock,
            decoy_hash,
        })
    }

    /// In-process defaults: in-memory store and directory, system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the token settings are invalid.
    pub fn from_config(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(Arc::clone(&clock)));
        let users = Arc::new(InMemoryUserDirectory::new(Arc::clone(&clock)));
        Self::new(
            config,
            store,
            users,
            Arc::new(Argon2Hasher::default()),
            clock,
        )
    }

    /// Current time in epoch milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Hash a password off the async workers.
    pub async fn hash_password(&self, password: &str) -> Result<String> {
        hash_blocking(Arc::clone(&self.hasher), password.to_string()).await
    }

    /// Verify a password off the async workers.
    pub async fn verify_password(&self, password: &str, stored: &str) -> bool {
        verify_blocking(Arc::clone(&self.hasher), password.to_string(), stored.to_string()).await
    }

    /// Spend one verification on a throwaway hash. Always `false`.
    pub(crate) async fn verify_decoy(&self, password: &str) -> bool {
        self.verify_password(password, &self.decoy_hash).await
    }
}

/// Create the router with the full filter chain.
///
/// Layers run outermost first: trace, panic recovery, CORS, security headers,
/// error stamping, rate limit, token auth, authorization.
///
/// # Errors
///
/// Returns [`Error::Config`](crate::Error::Config) for invalid CORS or header settings.
pub fn create_router(state: Arc<AppState>) -> Result<Router> {
    let headers = Arc::new(SecurityHeadersFilter::from_config(
        &state.config.security_headers,
    )?);
    let cors = cors_layer(&state.config.cors)?;
    let errors = Arc::new(ErrorBodyFilter::new(Arc::clone(&state.clock)));
    let rate_limit = Arc::new(RateLimitFilter::new(
        Arc::clone(&state.rate_limiter),
        Arc::clone(&state.audit),
        Arc::clone(&state.clock),
    ));
    let token_auth = Arc::new(TokenAuthFilter::new(
        Arc::clone(&state.tokens),
        Arc::clone(&state.users),
    ));
    let policy = Arc::new(RoutePolicy::blog_api(Arc::clone(&state.audit)));

    let router = Router::new()
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/profile", put(auth::update_profile))
        .route("/api/auth/password", put(auth::change_password))
        .route("/api/auth/users/{id}/deactivate", put(auth::deactivate))
        .route("/api/auth/users/{id}/activate", put(auth::activate))
        .route("/api/auth/admin/check", get(auth::admin_check))
        .route("/api/security/blacklist/status", get(security::blacklist_status))
        .route("/api/security/headers/test", get(security::headers_test))
        .route("/api/security/audit/stats", get(security::audit_stats))
        .route(
            "/api/security/rate-limit",
            get(security::rate_limit_info).delete(security::rate_limit_reset),
        )
        .route("/actuator/health", get(health::health))
        .route("/actuator/info", get(health::info))
        .layer(from_fn_with_state(policy, filter::run::<RoutePolicy>))
        .layer(from_fn_with_state(token_auth, filter::run::<TokenAuthFilter>))
        .layer(from_fn_with_state(rate_limit, filter::run::<RateLimitFilter>))
        .layer(from_fn_with_state(errors, filter::run::<ErrorBodyFilter>))
        .layer(from_fn_with_state(headers, filter::run::<SecurityHeadersFilter>))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(router)
}

/// `{message}` body for operations with nothing else to return.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Human-readable outcome
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            nickname: user.nickname.clone(),
            profile_image: user.profile_image.clone(),
            role: user.role,
            active: user.active,
            created_at: user.created_at,
        }
    }
}
