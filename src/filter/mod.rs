//! Request filter chain.
//!
//! Each filter implements [`Filter`] and is mounted with [`run`] as an axum
//! middleware. The router assembles them once, outermost first:
//!
//! ```text
//! security headers -> error stamping -> rate limit -> token auth -> authorization -> handler
//! ```
//!
//! A filter either short-circuits with a response or hands the request to
//! `next`. Infrastructure failures inside a filter never abort the chain.

mod auth;
mod errors;
mod headers;
mod rate_limit;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{Extensions, HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::audit::ClientInfo;

pub use auth::{AuthenticatedUser, TokenAuthFilter};
pub use errors::ErrorBodyFilter;
pub use headers::{SecurityHeadersFilter, cors_layer};
pub use rate_limit::RateLimitFilter;

/// One stage of the chain.
#[async_trait::async_trait]
pub trait Filter: Send + Sync + 'static {
    /// Process `request`, calling `next` to continue the chain.
    async fn handle(&self, request: Request<Body>, next: Next) -> Response;
}

/// Adapter mounting a [`Filter`] with `axum::middleware::from_fn_with_state`.
pub async fn run<F: Filter>(
    State(filter): State<Arc<F>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    filter.handle(request, next).await
}

/// Placeholder used when no client address can be resolved.
pub const UNKNOWN_IP: &str = "unknown";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn resolve_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(first) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return real_ip.to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| UNKNOWN_IP.to_string(), |ConnectInfo(addr)| addr.ip().to_string())
}

fn resolve_client(headers: &HeaderMap, extensions: &Extensions) -> ClientInfo {
    ClientInfo {
        ip: resolve_ip(headers, extensions),
        user_agent: header_str(headers, "user-agent").map(ToString::to_string),
    }
}

/// Resolve the caller's address.
///
/// First entry of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
#[must_use]
pub fn client_ip<B>(request: &Request<B>) -> String {
    resolve_ip(request.headers(), request.extensions())
}

/// Caller address and user agent, for audit events.
#[must_use]
pub fn client_info<B>(request: &Request<B>) -> ClientInfo {
    resolve_client(request.headers(), request.extensions())
}

/// Extractor for the caller's [`ClientInfo`].
#[derive(Debug, Clone)]
pub struct Client(pub ClientInfo);

impl<S: Send + Sync> FromRequestParts<S> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(resolve_client(&parts.headers, &parts.extensions)))
    }
}
