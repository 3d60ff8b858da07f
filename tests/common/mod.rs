//! Shared harness for the HTTP-level tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use blog_api::api::{AppState, LoginResponse, create_router};
use blog_api::clock::{Clock, ManualClock};
use blog_api::config::Config;
use blog_api::store::{
    BoundedIncrement, Counter, InMemoryStore, KvStore, StoreError, StoreResult,
};
use blog_api::users::{Argon2Hasher, InMemoryUserDirectory, NewUser, PasswordHasher, Role};

pub const START_MS: u64 = 1_700_000_000_000;
pub const PASSWORD: &str = "Passw0rd!";

/// In-memory store that can be switched into an outage.
pub struct FlakyStore {
    inner: InMemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: InMemoryStore::new(clock),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn count_prefix(&self, prefix: &str) -> StoreResult<usize> {
        self.check()?;
        self.inner.count_prefix(prefix).await
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Counter> {
        self.check()?;
        self.inner.increment(key, window).await
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<BoundedIncrement> {
        self.check()?;
        self.inner.increment_below(key, limit, window).await
    }

    async fn counter(&self, key: &str) -> StoreResult<Option<Counter>> {
        self.check()?;
        self.inner.counter(key).await
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn reap_expired(&self) -> usize {
        self.inner.reap_expired().await
    }
}

/// A fully wired router over a manual clock and a switchable store.
pub struct TestApp {
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyStore>,
    pub state: Arc<AppState>,
    pub router: Router,
}

/// Parsed response.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_hasher(config, Arc::new(Argon2Hasher::with_params(8, 1, 1).unwrap()))
    }

    pub fn with_hasher(config: Config, hasher: Arc<dyn PasswordHasher>) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = Arc::new(FlakyStore::new(clock.clone()));
        let users = Arc::new(InMemoryUserDirectory::new(clock.clone()));
        let state = Arc::new(
            AppState::new(
                config,
                store.clone(),
                users,
                hasher,
                clock.clone(),
            )
            .unwrap(),
        );
        let router = create_router(state.clone()).unwrap();
        Self {
            clock,
            store,
            state,
            router,
        }
    }

    pub async fn seed_user(&self, username: &str, role: Role) {
        self.state
            .users
            .create(NewUser {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password_hash: self.state.hasher.hash(PASSWORD).unwrap(),
                nickname: None,
                role,
            })
            .await
            .unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn login(&self, username: &str, ip: &str) -> LoginResponse {
        let reply = self
            .send(request(
                Method::POST,
                "/api/auth/login",
                ip,
                None,
                Some(json!({ "username": username, "password": PASSWORD })),
            ))
            .await;
        assert_eq!(reply.status, StatusCode::OK, "login failed: {}", reply.body);
        serde_json::from_value(reply.body).unwrap()
    }
}

/// Defaults with a fixed signing secret.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt.secret = "integration-test-secret-that-is-long-enough".to_string();
    config
}

pub fn request(
    method: Method,
    uri: &str,
    ip: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, "integration-test");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn get(uri: &str, ip: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, ip, token, None)
}
