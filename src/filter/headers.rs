//! Static security response headers and the CORS layer.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, header},
    middleware::Next,
    response::Response,
};
use tower_http::cors::CorsLayer;

use super::Filter;
use crate::config::{CorsConfig, SecurityHeadersConfig};
use crate::{Error, Result};

const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=(), payment=()";
const NO_CACHE: &str = "no-cache, no-store, max-age=0, must-revalidate";

/// Adds the security header set to every response.
///
/// Headers already set by a handler are left alone.
pub struct SecurityHeadersFilter {
    headers: Vec<(HeaderName, HeaderValue)>,
}

fn configured(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("security_headers.{name} is not a valid header value: {e}")))
}

impl SecurityHeadersFilter {
    /// Build the header set from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a configured value is not a valid header value.
    pub fn from_config(config: &SecurityHeadersConfig) -> Result<Self> {
        let headers = if config.enabled {
            vec![
                (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
                (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
                (header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
                (
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ),
                (
                    HeaderName::from_static("permissions-policy"),
                    HeaderValue::from_static(PERMISSIONS_POLICY),
                ),
                (
                    header::CONTENT_SECURITY_POLICY,
                    configured("content_security_policy", &config.content_security_policy)?,
                ),
                (
                    header::STRICT_TRANSPORT_SECURITY,
                    configured("strict_transport_security", &config.strict_transport_security)?,
                ),
                (header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE)),
                (header::PRAGMA, HeaderValue::from_static("no-cache")),
                (header::EXPIRES, HeaderValue::from_static("0")),
                (
                    HeaderName::from_static("x-api-version"),
                    configured("api_version", &config.api_version)?,
                ),
            ]
        } else {
            Vec::new()
        };
        Ok(Self { headers })
    }
}

#[async_trait::async_trait]
impl Filter for SecurityHeadersFilter {
    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let mut response = next.run(request).await;
        let target = response.headers_mut();
        for (name, value) in &self.headers {
            if !target.contains_key(name) {
                target.insert(name.clone(), value.clone());
            }
        }
        response
    }
}

/// Build the CORS layer from configuration.
///
/// # Errors
///
/// Returns [`Error::Config`] for unparsable origins, methods or header names,
/// or for a wildcard origin combined with credentials.
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    if config.allow_credentials && config.allowed_origins.iter().any(|o| o == "*") {
        return Err(Error::Config(
            "cors.allowed_origins cannot contain '*' when allow_credentials is true".to_string(),
        ));
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o).map_err(|e| Error::Config(format!("invalid CORS origin '{o}': {e}"))))
        .collect::<Result<Vec<_>>>()?;
    let methods = config
        .allowed_methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.as_bytes())
                .map_err(|e| Error::Config(format!("invalid CORS method '{m}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;
    let allowed_headers = header_names("allowed_headers", &config.allowed_headers)?;
    let exposed_headers = header_names("exposed_headers", &config.exposed_headers)?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(allowed_headers)
        .expose_headers(exposed_headers)
        .allow_credentials(config.allow_credentials)
        .max_age(Duration::from_secs(config.max_age_secs)))
}

fn header_names(field: &str, names: &[String]) -> Result<Vec<HeaderName>> {
    names
        .iter()
        .map(|n| {
            HeaderName::from_bytes(n.as_bytes())
                .map_err(|e| Error::Config(format!("invalid cors.{field} entry '{n}': {e}")))
        })
        .collect()
}
