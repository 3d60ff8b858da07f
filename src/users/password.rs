//! Credential hashing.
//!
//! Stored format is the PHC string produced by Argon2id, e.g.
//! `$argon2id$v=19$m=19456,t=2,p=1$<salt>$<hash>`. Verification reads the
//! cost parameters from the stored string, so raising the defaults does not
//! invalidate existing hashes.
//!
//! Hashing is CPU-bound; request handlers go through [`hash_blocking`] and
//! [`verify_blocking`] so the work runs on the blocking pool.

use std::sync::Arc;

use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::error;

use crate::{Error, Result};

/// Hash and verify passwords.
pub trait PasswordHasher: Send + Sync + 'static {
    /// Hash `password` with a fresh salt.
    fn hash(&self, password: &str) -> Result<String>;

    /// Whether `password` matches a stored hash. Malformed hashes never match.
    fn verify(&self, password: &str, stored: &str) -> bool;
}

/// Argon2id with configurable cost.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    /// 19 MiB, 2 passes, 1 lane.
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl Argon2Hasher {
    /// Hasher with explicit cost parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the parameters are outside Argon2's limits.
    pub fn with_params(memory_kib: u32, passes: u32, lanes: u32) -> Result<Self> {
        let params = Params::new(memory_kib, passes, lanes, None)
            .map_err(|e| Error::Config(format!("invalid argon2 parameters: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
            .map_err(|e| Error::Internal(format!("salt encoding failed: {e}")))?;
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, stored: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

/// [`PasswordHasher::hash`] on the blocking pool.
pub async fn hash_blocking(hasher: Arc<dyn PasswordHasher>, password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| Error::Internal(format!("password hashing task failed: {e}")))?
}

/// [`PasswordHasher::verify`] on the blocking pool. A failed task never matches.
pub async fn verify_blocking(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
    stored: String,
) -> bool {
    match tokio::task::spawn_blocking(move || hasher.verify(&password, &stored)).await {
        Ok(matches) => matches,
        Err(e) => {
            error!(error = %e, "Password verification task failed");
            false
        }
    }
}
