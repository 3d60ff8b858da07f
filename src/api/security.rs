//! `/api/security/*` monitoring handlers. Admin only.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{AppState, MessageResponse};
use crate::rate_limit::{EndpointClass, RateLimitInfo, RateLimitScope};
use crate::{Error, Result};

/// `GET /api/security/blacklist/status`
pub(super) async fn blacklist_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let size = state.tokens.revocations().size().await;
    Json(json!({
        "blacklistSize": size,
        "timestamp": state.now_millis(),
    }))
}

/// `GET /api/security/headers/test`
pub(super) async fn headers_test(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "Security headers are configured",
        "timestamp": state.now_millis(),
        "status": "secure",
    }))
}

/// `GET /api/security/audit/stats`
pub(super) async fn audit_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.audit.stats().await;
    Json(json!({
        "totalEvents": stats.total_events,
        "suspiciousActivities": stats.suspicious_activities,
        "timestamp": state.now_millis(),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct CounterQuery {
    scope: String,
    value: String,
    endpoint: String,
}

impl CounterQuery {
    fn resolve(&self) -> Result<(RateLimitScope, EndpointClass)> {
        let scope = match self.scope.to_ascii_lowercase().as_str() {
            "ip" => RateLimitScope::Ip(self.value.clone()),
            "user" => RateLimitScope::User(self.value.clone()),
            other => {
                return Err(Error::bad_request(
                    "INVALID_SCOPE",
                    format!("Unknown scope '{other}', expected 'ip' or 'user'"),
                ));
            }
        };
        let class = EndpointClass::parse(&self.endpoint).ok_or_else(|| {
            Error::bad_request(
                "INVALID_ENDPOINT",
                format!(
                    "Unknown endpoint class '{}', expected login, api or default",
                    self.endpoint
                ),
            )
        })?;
        Ok((scope, class))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CounterResponse {
    scope: &'static str,
    value: String,
    endpoint: EndpointClass,
    #[serde(flatten)]
    info: RateLimitInfo,
}

/// `GET /api/security/rate-limit?scope=&value=&endpoint=`
pub(super) async fn rate_limit_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CounterQuery>,
) -> Result<Json<CounterResponse>> {
    let (scope, class) = query.resolve()?;
    let info = state
        .rate_limiter
        .info(&scope, class)
        .await
        .ok_or_else(|| Error::Internal("rate limit store unavailable".to_string()))?;
    Ok(Json(CounterResponse {
        scope: scope.kind(),
        value: query.value,
        endpoint: class,
        info,
    }))
}

/// `DELETE /api/security/rate-limit?scope=&value=&endpoint=`
pub(super) async fn rate_limit_reset(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CounterQuery>,
) -> Result<Json<MessageResponse>> {
    let (scope, class) = query.resolve()?;
    state.rate_limiter.reset(&scope, class).await;
    tracing::info!(scope = scope.kind(), endpoint = %class, "Rate limit counter reset by admin");
    Ok(Json(MessageResponse::new("Rate limit counter reset")))
}
