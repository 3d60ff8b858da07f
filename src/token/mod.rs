//! Stateless bearer tokens: issuance, validation and revocation.
//!
//! Tokens are HS512-signed JWTs carrying `{sub, iat, exp, typ, jti}`. Access
//! and refresh tokens share the same structure and verification path; only
//! their lifetime and `typ` differ.
//!
//! Every query here classifies untrusted input. Signature, parse and expiry
//! failures are reduced to `false` / `None` / `0` and never surface as errors.
//!
//! ```text
//! validate(token)
//!   -> revocation list hit?        -> false   (store down counts as a hit)
//!   -> signature / structure bad?  -> false
//!   -> exp <= now?                 -> false
//!   -> true
//! ```

pub mod revocation;

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::config::JwtConfig;
use crate::{Error, Result};

pub use revocation::{REVOCATION_PREFIX, RevocationStore};

/// Minimum accepted length of the signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Which lifetime a token was issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived token presented on every request
    Access,
    /// Long-lived token exchanged for new access tokens
    Refresh,
}

/// Signed claims embedded in every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity subject (username)
    pub sub: String,
    /// Issued-at (Unix epoch seconds)
    pub iat: u64,
    /// Expires-at (Unix epoch seconds)
    pub exp: u64,
    /// Token kind
    pub typ: TokenKind,
    /// Unique token id
    pub jti: String,
}

/// Issues and verifies signed tokens, consulting the revocation list.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revocations: RevocationStore,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a token service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes or either TTL is zero.
    pub fn new(
        secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
        revocations: RevocationStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "JWT secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if access_ttl.is_zero() || refresh_ttl.is_zero() {
            return Err(Error::Config("Token TTLs must be non-zero".to_string()));
        }

        // Expiry is checked against the injected clock, not the library's.
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
            revocations,
            clock,
        })
    }

    /// Create a token service from configuration.
    pub fn from_config(
        config: &JwtConfig,
        revocations: RevocationStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let secret = config.resolve_secret()?;
        Self::new(
            &secret,
            Duration::from_secs(config.access_token_ttl_secs),
            Duration::from_secs(config.refresh_token_ttl_secs),
            revocations,
            clock,
        )
    }

    /// Access token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// The revocation list this service consults.
    #[must_use]
    pub fn revocations(&self) -> &RevocationStore {
        &self.revocations
    }

    /// Issue a short-lived access token for `subject`.
    pub fn issue_access_token(&self, subject: &str) -> Result<String> {
        self.issue(subject, TokenKind::Access, self.access_ttl)
    }

    /// Issue a long-lived refresh token for `subject`.
    pub fn issue_refresh_token(&self, subject: &str) -> Result<String> {
        self.issue(subject, TokenKind::Refresh, self.refresh_ttl)
    }

    fn issue(&self, subject: &str, typ: TokenKind, ttl: Duration) -> Result<String> {
        let iat = self.clock.now_secs();
        let claims = Claims {
            sub: subject.to_string(),
            iat,
            exp: iat + ttl.as_secs(),
            typ,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS512), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token signing failed: {e}")))
    }

    /// Verify the signature and structure, ignoring expiry and revocation.
    fn verified_claims(&self, token: &str) -> Option<Claims> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "Token failed verification");
                None
            }
        }
    }

    fn is_expired(&self, claims: &Claims) -> bool {
        self.clock.now_secs() >= claims.exp
    }

    /// Whether `token` is authentic, unexpired and not revoked.
    pub async fn validate(&self, token: &str) -> bool {
        if self.revocations.exists(token).await {
            debug!("Token is revoked");
            return false;
        }
        match self.verified_claims(token) {
            Some(claims) if !self.is_expired(&claims) => true,
            Some(_) => {
                debug!("Token is expired");
                false
            }
            None => false,
        }
    }

    /// Subject of an authentic, unexpired token.
    ///
    /// Does not consult the revocation list; call [`validate`](Self::validate)
    /// before trusting the subject.
    #[must_use]
    pub fn subject_of(&self, token: &str) -> Option<String> {
        self.verified_claims(token)
            .filter(|claims| !self.is_expired(claims))
            .map(|claims| claims.sub)
    }

    /// Kind of an authentic token.
    #[must_use]
    pub fn kind_of(&self, token: &str) -> Option<TokenKind> {
        self.verified_claims(token).map(|claims| claims.typ)
    }

    /// Embedded expiry (epoch seconds) of an authentic token, `0` otherwise.
    #[must_use]
    pub fn expiry_of(&self, token: &str) -> u64 {
        self.verified_claims(token).map_or(0, |claims| claims.exp)
    }

    /// Revoke `token` for the rest of its natural lifetime.
    ///
    /// Returns `true` if a revocation entry was written; expired or forged
    /// tokens are ignored.
    pub async fn invalidate(&self, token: &str) -> bool {
        let exp_ms = self.expiry_of(token).saturating_mul(1000);
        let remaining = exp_ms.saturating_sub(self.clock.now_millis());
        if remaining == 0 {
            debug!("Token already expired or unverifiable, nothing to revoke");
            return false;
        }
        self.revocations.put(token, Duration::from_millis(remaining)).await;
        true
    }
}

/// Extract the bearer token from an `Authorization` header value.
///
/// The value must start with the literal `"Bearer "`.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryStore, KvStore};

    const SECRET: &str = "test-secret-that-is-long-enough-for-hs512!!";

    fn service() -> (Arc<ManualClock>, Arc<InMemoryStore>, TokenService) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let service = TokenService::new(
            SECRET,
            Duration::from_secs(3600),
            Duration::from_secs(7 * 24 * 3600),
            RevocationStore::new(store.clone()),
            clock.clone(),
        )
        .unwrap();
        (clock, store, service)
    }

    #[test]
    fn rejects_short_secret() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let result = TokenService::new(
            "short",
            Duration::from_secs(1),
            Duration::from_secs(1),
            RevocationStore::new(store),
            clock,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn access_token_valid_until_ttl() {
        // GIVEN: a fresh access token
        let (clock, _store, service) = service();
        let token = service.issue_access_token("alice").unwrap();

        // THEN: valid immediately and just before expiry
        assert!(service.validate(&token).await);
        clock.advance(Duration::from_secs(3599));
        assert!(service.validate(&token).await);

        // WHEN: the TTL elapses
        clock.advance(Duration::from_secs(1));

        // THEN: rejected
        assert!(!service.validate(&token).await);
    }

    #[tokio::test]
    async fn invalidate_revokes_until_natural_expiry() {
        // GIVEN: a valid token
        let (clock, store, service) = service();
        let token = service.issue_access_token("alice").unwrap();
        assert!(service.validate(&token).await);

        // WHEN: it is invalidated
        assert!(service.invalidate(&token).await);

        // THEN: rejected, and the revocation entry exists
        assert!(!service.validate(&token).await);
        assert_eq!(service.revocations().size().await, 1);

        // WHEN: the token's natural lifetime ends
        clock.advance(Duration::from_secs(3600));

        // THEN: the revocation entry has expired with it
        assert_eq!(service.revocations().size().await, 0);
        assert_eq!(store.reap_expired().await, 1);
        assert_eq!(store.raw_len(), 0);
        assert!(!service.validate(&token).await);
    }

    #[tokio::test]
    async fn invalidate_expired_token_is_noop() {
        let (clock, _store, service) = service();
        let token = service.issue_access_token("alice").unwrap();
        clock.advance(Duration::from_secs(4000));

        assert!(!service.invalidate(&token).await);
        assert_eq!(service.revocations().size().await, 0);
    }

    #[tokio::test]
    async fn tampered_and_malformed_tokens_fail_closed() {
        let (_clock, _store, service) = service();
        let token = service.issue_access_token("alice").unwrap();
        let mut tampered = token.clone();
        tampered.push('x');

        assert!(!service.validate(&tampered).await);
        assert!(!service.validate("not-a-jwt").await);
        assert!(!service.validate("").await);
        assert_eq!(service.expiry_of("not-a-jwt"), 0);
        assert_eq!(service.subject_of("not-a-jwt"), None);
        assert!(!service.invalidate("not-a-jwt").await);
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let (clock, store, service) = service();
        let other = TokenService::new(
            "a-completely-different-secret-of-decent-length",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            RevocationStore::new(store),
            clock,
        )
        .unwrap();
        let foreign = other.issue_access_token("mallory").unwrap();

        assert!(!service.validate(&foreign).await);
        assert_eq!(service.subject_of(&foreign), None);
    }

    #[test]
    fn subject_of_refuses_expired_tokens() {
        let (clock, _store, service) = service();
        let token = service.issue_access_token("alice").unwrap();
        assert_eq!(service.subject_of(&token).as_deref(), Some("alice"));

        clock.advance(Duration::from_secs(3600));
        assert_eq!(service.subject_of(&token), None);
        // expiry is still readable for revocation bookkeeping
        assert!(service.expiry_of(&token) > 0);
    }

    #[test]
    fn refresh_token_outlives_access_token() {
        let (clock, _store, service) = service();
        let access = service.issue_access_token("alice").unwrap();
        let refresh = service.issue_refresh_token("alice").unwrap();

        assert_eq!(service.kind_of(&access), Some(TokenKind::Access));
        assert_eq!(service.kind_of(&refresh), Some(TokenKind::Refresh));
        assert_eq!(
            service.expiry_of(&refresh) - service.expiry_of(&access),
            7 * 24 * 3600 - 3600
        );

        clock.advance(Duration::from_secs(7200));
        assert_eq!(service.subject_of(&refresh).as_deref(), Some("alice"));
    }

    #[test]
    fn tokens_issued_in_same_second_are_distinct() {
        let (_clock, _store, service) = service();
        let a = service.issue_access_token("alice").unwrap();
        let b = service.issue_access_token("alice").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bearer_prefix_is_literal() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer abc.def"), None);
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
