//! Configuration management

use std::{env, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::rate_limit::EndpointClass;
use crate::token::MIN_SECRET_LEN;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token signing and lifetimes
    pub jwt: JwtConfig,
    /// Request rate limiting
    pub rate_limit: RateLimitConfig,
    /// Audit logging
    pub audit: AuditConfig,
    /// Cross-origin resource sharing
    pub cors: CorsConfig,
    /// Static security response headers
    pub security_headers: SecurityHeadersConfig,
    /// Shared store maintenance
    pub store: StoreConfig,
    /// Administrator account created at startup
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Signing secret.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (random per process)
    pub secret: String,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "auto".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl JwtConfig {
    /// Resolve the signing secret (expand env vars, generate if `auto`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an `env:` reference names an unset variable.
    pub fn resolve_secret(&self) -> Result<String> {
        if self.secret == "auto" {
            let mut random_bytes = Vec::with_capacity(32);
            random_bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
            random_bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
            Ok(base64::Engine::encode(
                &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                random_bytes,
            ))
        } else {
            resolve_env_ref("jwt.secret", &self.secret)
        }
    }
}

/// Expand an `env:VAR_NAME` reference. Plain values pass through.
///
/// An unset or empty variable is an error; the reference text itself is never
/// used as the value.
fn resolve_env_ref(field: &str, value: &str) -> Result<String> {
    let Some(var_name) = value.strip_prefix("env:") else {
        return Ok(value.to_string());
    };
    match env::var(var_name) {
        Ok(resolved) if !resolved.is_empty() => Ok(resolved),
        Ok(_) => Err(Error::Config(format!("{field}: environment variable {var_name} is empty"))),
        Err(e) => Err(Error::Config(format!("{field}: environment variable {var_name}: {e}"))),
    }
}

/// Threshold and window for one endpoint class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitTier {
    /// Maximum requests per window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Paths that bypass rate limiting entirely
    pub exempt_paths: Vec<String>,
    /// `X-RateLimit-Warning` is added when remaining requests drop to this value
    pub warning_threshold: u64,
    /// `/api/auth/login*`
    pub login: RateLimitTier,
    /// Other `/api/*` paths
    pub api: RateLimitTier,
    /// Everything else
    pub default: RateLimitTier,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exempt_paths: vec!["/actuator/health".to_string(), "/actuator/info".to_string()],
            warning_threshold: 10,
            login: RateLimitTier {
                max_requests: 5,
                window_secs: 300,
            },
            api: RateLimitTier {
                max_requests: 1000,
                window_secs: 3600,
            },
            default: RateLimitTier {
                max_requests: 100,
                window_secs: 60,
            },
        }
    }
}

impl RateLimitConfig {
    /// Tier for an endpoint class
    #[must_use]
    pub fn tier(&self, class: EndpointClass) -> RateLimitTier {
        match class {
            EndpointClass::Login => self.login,
            EndpointClass::Api => self.api,
            EndpointClass::Default => self.default,
        }
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// How long stored events are kept
    pub retention_days: u64,
    /// Flagged events per (identity, address) that trigger escalation
    pub suspicious_threshold: u64,
    /// Window for counting flagged events, in seconds
    pub suspicious_window_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            suspicious_threshold: 5,
            suspicious_window_secs: 3600,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed request headers
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to scripts
    pub exposed_headers: Vec<String>,
    /// Whether credentials are allowed
    pub allow_credentials: bool,
    /// Preflight cache duration in seconds
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Authorization", "Content-Type", "X-Requested-With"]
                .map(String::from)
                .to_vec(),
            exposed_headers: ["Authorization", "X-API-Version"].map(String::from).to_vec(),
            allow_credentials: true,
            max_age_secs: 3600,
        }
    }
}

/// Security response headers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    /// Add the headers to every response
    pub enabled: bool,
    /// `Content-Security-Policy` value
    pub content_security_policy: String,
    /// `Strict-Transport-Security` value
    pub strict_transport_security: String,
    /// `X-API-Version` value
    pub api_version: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_security_policy: [
                "default-src 'self'",
                "script-src 'self' 'unsafe-inline' 'unsafe-eval' https://cdn.jsdelivr.net",
                "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com",
                "font-src 'self' https://fonts.gstatic.com",
                "img-src 'self' data: https:",
                "connect-src 'self' https://api.example.com",
                "frame-ancestors 'none'",
                "base-uri 'self'",
                "form-action 'self'",
            ]
            .join("; "),
            strict_transport_security: "max-age=31536000; includeSubDomains; preload".to_string(),
            api_version: "1.0".to_string(),
        }
    }
}

/// Shared store maintenance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Interval between expired-entry sweeps, in seconds
    pub reap_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: 60,
        }
    }
}

/// Administrator account seeded at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    /// Username
    pub username: String,
    /// Email address
    pub email: String,
    /// Password (supports `env:VAR_NAME`)
    pub password: String,
}

impl BootstrapAdmin {
    /// Resolve the password (expand env vars)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an `env:` reference names an unset variable.
    pub fn resolve_password(&self) -> Result<String> {
        resolve_env_ref("bootstrap_admin.password", &self.password)
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (BLOG_API_ prefix)
        figment = figment.merge(Env::prefixed("BLOG_API_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env: resolution)
        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::debug!(path = %expanded, "Loaded env file"),
                    Err(e) => tracing::warn!(path = %expanded, error = %e, "Failed to load env file"),
                }
            }
        }
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret != "auto" && self.jwt.resolve_secret()?.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "jwt.secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.jwt.access_token_ttl_secs == 0 || self.jwt.refresh_token_ttl_secs == 0 {
            return Err(Error::Config("jwt token TTLs must be non-zero".to_string()));
        }
        for class in EndpointClass::ALL {
            let tier = self.rate_limit.tier(class);
            if tier.max_requests == 0 || tier.window_secs == 0 {
                return Err(Error::Config(format!(
                    "rate_limit.{} must have non-zero max_requests and window_secs",
                    class.as_str()
                )));
            }
        }
        if self.audit.suspicious_window_secs == 0 || self.audit.retention_days == 0 {
            return Err(Error::Config(
                "audit retention and suspicious window must be non-zero".to_string(),
            ));
        }
        if self.store.reap_interval_secs == 0 {
            return Err(Error::Config("store.reap_interval_secs must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Copy of this configuration safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.jwt.secret != "auto" && !copy.jwt.secret.starts_with("env:") {
            copy.jwt.secret = "<redacted>".to_string();
        }
        if let Some(admin) = copy.bootstrap_admin.as_mut() {
            if !admin.password.starts_with("env:") {
                admin.password = "<redacted>".to_string();
            }
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_rate_limit_table() {
        let config = Config::default();

        assert_eq!(config.rate_limit.tier(EndpointClass::Login), RateLimitTier { max_requests: 5, window_secs: 300 });
        assert_eq!(config.rate_limit.tier(EndpointClass::Api), RateLimitTier { max_requests: 1000, window_secs: 3600 });
        assert_eq!(config.rate_limit.tier(EndpointClass::Default), RateLimitTier { max_requests: 100, window_secs: 60 });
        assert_eq!(config.audit.retention_days, 30);
        assert_eq!(config.audit.suspicious_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn auto_secret_is_long_and_random() {
        let jwt = JwtConfig::default();
        let a = jwt.resolve_secret().unwrap();
        let b = jwt.resolve_secret().unwrap();
        assert!(a.len() >= MIN_SECRET_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn unset_env_secret_is_rejected_not_used_literally() {
        // GIVEN: a secret reference to a variable that is not set
        let var = "BLOG_API_TEST_UNSET_SIGNING_SECRET_7F3A";
        assert!(env::var(var).is_err());
        let mut config = Config::default();
        config.jwt.secret = format!("env:{var}");

        // THEN: resolution and validation both fail
        assert!(matches!(config.jwt.resolve_secret(), Err(Error::Config(_))));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn plain_values_pass_through_env_resolution() {
        let jwt = JwtConfig {
            secret: "a-literal-secret-that-is-long-enough-for-hs512".to_string(),
            ..JwtConfig::default()
        };
        assert_eq!(jwt.resolve_secret().unwrap(), jwt.secret);

        let admin = BootstrapAdmin {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: "env:BLOG_API_TEST_UNSET_ADMIN_PASSWORD_7F3A".to_string(),
        };
        assert!(matches!(admin.resolve_password(), Err(Error::Config(_))));
    }

    #[test]
    fn short_literal_secret_fails_validation() {
        let mut config = Config::default();
        config.jwt.secret = "too-short".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn zero_tier_fails_validation() {
        let mut config = Config::default();
        config.rate_limit.login.max_requests = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limit.login"));
    }

    #[test]
    fn load_from_yaml_file() {
        // GIVEN: a YAML file overriding a few fields
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9090\njwt:\n  secret: 0123456789abcdef0123456789abcdef\n  access_token_ttl_secs: 60\nrate_limit:\n  login:\n    max_requests: 3\n    window_secs: 30\n"
        )
        .unwrap();

        // WHEN: loading it
        let config = Config::load(Some(file.path())).unwrap();

        // THEN: overrides applied, untouched fields keep defaults
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.jwt.access_token_ttl_secs, 60);
        assert_eq!(config.jwt.refresh_token_ttl_secs, 7 * 24 * 3600);
        assert_eq!(config.rate_limit.login.max_requests, 3);
        assert_eq!(config.rate_limit.api.max_requests, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/blog-api.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn redacted_hides_literal_secrets() {
        let mut config = Config::default();
        config.jwt.secret = "0123456789abcdef0123456789abcdef".to_string();
        config.bootstrap_admin = Some(BootstrapAdmin {
            username: "admin".to_string(),
            email: "admin@example.com".to_string(),
            password: "Admin123!".to_string(),
        });

        let redacted = config.redacted();
        assert_eq!(redacted.jwt.secret, "<redacted>");
        assert_eq!(redacted.bootstrap_admin.unwrap().password, "<redacted>");
    }
}
