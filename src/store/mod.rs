//! Shared key-value store. The synchronization boundary for all request tasks.
//!
//! Revocation entries, rate-limit counters, audit events and suspicious-activity
//! counters all live behind the [`KvStore`] trait. Every mutation a caller
//! relies on for correctness under concurrency is a single primitive here:
//!
//! - [`KvStore::increment`]: atomic increment, starting a TTL window on first hit
//! - [`KvStore::increment_below`]: atomic check-and-increment against a limit
//! - [`KvStore::set`]: atomic insert with TTL
//!
//! Callers never read a counter and write it back.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub use memory::InMemoryStore;

/// Errors raised by a store backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Backend unreachable or refusing operations
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Key holds a value of the wrong kind for the operation
    #[error("wrong value type for key '{0}'")]
    WrongType(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A windowed counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Hits counted in the current window
    pub count: u64,
    /// When the window closes (epoch millis)
    pub expires_at_ms: u64,
}

/// Outcome of [`KvStore::increment_below`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundedIncrement {
    /// The counter was below the limit and has been incremented.
    Incremented(Counter),
    /// The counter already reached the limit and was left untouched.
    AtLimit(Counter),
}

/// Trait abstracting the shared store backend.
///
/// Implementations must be `Send + Sync` because one store is shared across
/// every request task. Expired entries must be invisible to all reads even
/// before [`reap_expired`](KvStore::reap_expired) removes them.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Insert or replace a string value with a time-to-live.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    /// Read a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Whether a live entry exists for `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove an entry. Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Count live entries whose key starts with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Atomically increment a counter, opening a `window`-long window when
    /// the key is absent or expired.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Counter>;

    /// Atomically increment a counter only while it is below `limit`.
    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<BoundedIncrement>;

    /// Read a counter without modifying it.
    async fn counter(&self, key: &str) -> StoreResult<Option<Counter>>;

    /// Remaining lifetime of a live entry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Remove all expired entries. Called periodically by the background reaper.
    async fn reap_expired(&self) -> usize;
}

/// Spawn a background task that reaps expired entries every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn KvStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired store entries");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Store reaper shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn reaper_stops_on_shutdown() {
        // GIVEN: a running reaper
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new(Arc::new(ManualClock::new(0))));
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let handle = spawn_reaper(store, Duration::from_millis(10), rx);

        // WHEN: shutdown is signalled
        tx.send(()).unwrap();

        // THEN: the task finishes
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reaper did not stop")
            .unwrap();
    }
}
