//! Restamps API error bodies from the application clock.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::Filter;
use crate::clock::Clock;
use crate::error::ErrorResponse;

/// Rewrites the `timestamp` of every [`ErrorResponse`] body produced further
/// down the chain. Other responses pass through untouched.
pub struct ErrorBodyFilter {
    clock: Arc<dyn Clock>,
}

impl ErrorBodyFilter {
    /// Create the filter.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait::async_trait]
impl Filter for ErrorBodyFilter {
    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let mut response = next.run(request).await;
        let Some(body) = response.extensions_mut().remove::<ErrorResponse>() else {
            return response;
        };

        let body = body.stamped(self.clock.as_ref());
        match serde_json::to_vec(&body) {
            Ok(bytes) => {
                let (mut parts, _) = response.into_parts();
                parts.headers.remove(header::CONTENT_LENGTH);
                Response::from_parts(parts, Body::from(bytes))
            }
            Err(e) => {
                warn!(error = %e, "Could not restamp error body");
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::clock::ManualClock;
    use axum::{Router, http::StatusCode, middleware::from_fn_with_state, routing::get};
    use chrono::DateTime;
    use tower::ServiceExt;

    async fn missing() -> Result<String, Error> {
        Err(Error::NotFound("Post".to_string()))
    }

    async fn fine() -> &'static str {
        "ok"
    }

    fn app(clock: Arc<ManualClock>) -> Router {
        let filter = Arc::new(ErrorBodyFilter::new(clock));
        Router::new()
            .route("/missing", get(missing))
            .route("/fine", get(fine))
            .layer(from_fn_with_state(filter, super::super::run::<ErrorBodyFilter>))
    }

    async fn body(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn error_timestamp_follows_the_clock() {
        // GIVEN: a clock far from the wall time
        let clock = Arc::new(ManualClock::new(1_000_000_000_000));
        let app = app(clock.clone());

        // WHEN: a handler fails
        let (status, text) = body(&app, "/missing").await;

        // THEN: the body keeps its fields and carries the clock's time
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "Post not found");
        let stamped = DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).unwrap();
        assert_eq!(stamped.timestamp_millis(), 1_000_000_000_000);

        clock.advance(std::time::Duration::from_secs(5));
        let (_, text) = body(&app, "/missing").await;
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let stamped = DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).unwrap();
        assert_eq!(stamped.timestamp_millis(), 1_000_000_005_000);
    }

    #[tokio::test]
    async fn other_responses_are_untouched() {
        let app = app(Arc::new(ManualClock::new(0)));
        assert_eq!(body(&app, "/fine").await, (StatusCode::OK, "ok".to_string()));
    }
}
