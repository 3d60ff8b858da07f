//! Revocation list for tokens invalidated before their natural expiry.
//!
//! Each entry lives exactly as long as the token it revokes, so the list
//! cleans itself up. Lookups fail closed: if the store cannot answer, the
//! token is treated as revoked. Writes are best-effort.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::KvStore;

/// Key namespace for revocation entries.
pub const REVOCATION_PREFIX: &str = "blacklist:";

/// Revocation store over the shared [`KvStore`].
#[derive(Clone)]
pub struct RevocationStore {
    store: Arc<dyn KvStore>,
}

impl RevocationStore {
    /// Create a revocation store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(token: &str) -> String {
        format!("{REVOCATION_PREFIX}{token}")
    }

    /// Record `token` as revoked for `ttl`.
    pub async fn put(&self, token: &str, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        match self.store.set(&Self::key(token), "revoked".to_string(), ttl).await {
            Ok(()) => debug!(ttl_secs = ttl.as_secs(), "Token added to revocation list"),
            Err(e) => error!(error = %e, "Failed to record token revocation"),
        }
    }

    /// Whether `token` is revoked. Returns `true` when the store is unavailable.
    pub async fn exists(&self, token: &str) -> bool {
        match self.store.exists(&Self::key(token)).await {
            Ok(revoked) => revoked,
            Err(e) => {
                error!(error = %e, "Revocation lookup failed, treating token as revoked");
                true
            }
        }
    }

    /// Remove a revocation entry.
    pub async fn delete(&self, token: &str) {
        if let Err(e) = self.store.delete(&Self::key(token)).await {
            error!(error = %e, "Failed to delete revocation entry");
        }
    }

    /// Count revocation entries whose token starts with `prefix`.
    ///
    /// Returns 0 when the store is unavailable.
    pub async fn count_matching_prefix(&self, prefix: &str) -> usize {
        let full = format!("{REVOCATION_PREFIX}{prefix}");
        match self.store.count_prefix(&full).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to count revocation entries");
                0
            }
        }
    }

    /// Number of live revocation entries.
    pub async fn size(&self) -> usize {
        self.count_matching_prefix("").await
    }
}
