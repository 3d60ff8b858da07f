//! Error types for the blog API

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::store::StoreError;

/// Result type alias for the blog API
pub type Result<T> = std::result::Result<T, Error>;

/// Blog API errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Missing or unusable credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request rejected by a business rule
    #[error("{message}")]
    BadRequest {
        /// Machine-readable error code
        code: &'static str,
        /// Human-readable message
        message: String,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a bad-request error with a code
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest { .. } | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for the response body
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "ACCESS_DENIED",
            Self::BadRequest { code, .. } => code,
            Self::Json(_) => "INVALID_JSON",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "DUPLICATE_RESOURCE",
            _ => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Message safe to show to API clients.
    ///
    /// Authentication failures are deliberately generic so a client cannot
    /// tell an expired token from a revoked or forged one.
    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Authentication failed".to_string(),
            Self::Forbidden(_) => "Access denied".to_string(),
            Self::BadRequest { message, .. } => message.clone(),
            Self::Json(_) => "Malformed request body".to_string(),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Conflict(what) => what.clone(),
            _ => "An internal error occurred".to_string(),
        }
    }
}

/// JSON body returned for every API error.
///
/// [`Error::into_response`](IntoResponse::into_response) also stores a copy in
/// the response extensions so the error filter can restamp it from the
/// application clock.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code (e.g. `"UNAUTHORIZED"`)
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// When the error was produced
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    /// Build an error body stamped with the system time
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(code, message, &SystemClock)
    }

    /// Build an error body stamped from `clock`
    pub fn at(code: impl Into<String>, message: impl Into<String>, clock: &dyn Clock) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: timestamp(clock),
        }
    }

    /// Replace the timestamp with the time on `clock`.
    #[must_use]
    pub fn stamped(mut self, clock: &dyn Clock) -> Self {
        self.timestamp = timestamp(clock);
        self
    }
}

fn timestamp(clock: &dyn Clock) -> DateTime<Utc> {
    i64::try_from(clock.now_millis())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = ErrorResponse::new(self.code(), self.public_message());
        let mut response = if status == StatusCode::UNAUTHORIZED {
            (status, [("WWW-Authenticate", "Bearer")], Json(body.clone())).into_response()
        } else {
            (status, Json(body.clone())).into_response()
        };
        response.extensions_mut().insert(body);
        response
    }
}
