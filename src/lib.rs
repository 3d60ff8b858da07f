//! Blog API Library
//!
//! Authentication core of a blog backend, served over HTTP with axum.
//!
//! # Features
//!
//! - **Tokens**: HMAC-signed access and refresh tokens with server-side revocation
//! - **Rate limiting**: fixed-window counters per IP and per user, by endpoint class
//! - **Filter chain**: security headers, CORS, rate limit, token auth, route policy
//! - **Audit**: persisted security events with suspicious-activity escalation
//!
//! All shared state lives behind [`store::KvStore`], so several instances can
//! share one counter and revocation view.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod audit;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod policy;
pub mod rate_limit;
pub mod server;
pub mod store;
pub mod token;
pub mod users;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` wins over `level` when set.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
