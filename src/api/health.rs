//! Liveness and build info. Public and exempt from rate limiting.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use super::AppState;

const PROBE_KEY: &str = "health:probe";

/// `GET /actuator/health`
pub(super) async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, store) = match state.store.exists(PROBE_KEY).await {
        Ok(_) => (StatusCode::OK, "UP"),
        Err(e) => {
            tracing::warn!(error = %e, "Health probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "DOWN")
        }
    };
    let overall = if status.is_success() { "UP" } else { "DOWN" };
    (
        status,
        Json(json!({
            "status": overall,
            "components": { "store": { "status": store } },
        })),
    )
}

/// `GET /actuator/info`
pub(super) async fn info() -> impl IntoResponse {
    Json(json!({
        "app": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
        }
    }))
}
