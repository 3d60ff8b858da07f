//! In-process [`KvStore`] backed by a `DashMap`.
//!
//! Atomicity comes from the map's entry API: each compound operation runs
//! while holding the shard lock for its key, so concurrent increments on the
//! same key serialize and never double-count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use super::{BoundedIncrement, Counter, KvStore, StoreError, StoreResult};
use crate::clock::{Clock, duration_millis};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Count(u64),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: u64,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    fn counter(&self, key: &str) -> StoreResult<Counter> {
        match self.value {
            Value::Count(count) => Ok(Counter {
                count,
                expires_at_ms: self.expires_at_ms,
            }),
            Value::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

/// In-memory store with clock-driven expiry.
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create an empty store reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries physically held, including expired ones not yet reaped.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.entries.len()
    }

    fn deadline(&self, ttl: Duration) -> u64 {
        self.clock
            .now_millis()
            .saturating_add(duration_millis(ttl))
    }

    fn fresh_counter(&self, window: Duration) -> Entry {
        Entry {
            value: Value::Count(1),
            expires_at_ms: self.deadline(window),
        }
    }

    /// Read a live entry, lazily evicting it when expired.
    fn live(&self, key: &str) -> Option<Entry> {
        let now = self.clock.now_millis();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry.clone())
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let entry = Entry {
            value: Value::Text(value),
            expires_at_ms: self.deadline(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.live(key) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text)),
            Some(Entry {
                value: Value::Count(count),
                ..
            }) => Ok(Some(count.to_string())),
            None => Ok(None),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.live(key).is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn count_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.value().is_expired(now))
            .count())
    }

    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Counter> {
        let now = self.clock.now_millis();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = self.fresh_counter(window);
                } else {
                    match &mut entry.value {
                        Value::Count(count) => *count += 1,
                        Value::Text(_) => return Err(StoreError::WrongType(key.to_string())),
                    }
                }
                entry.counter(key)
            }
            MapEntry::Vacant(vacant) => {
                let entry = vacant.insert(self.fresh_counter(window));
                entry.counter(key)
            }
        }
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> StoreResult<BoundedIncrement> {
        let now = self.clock.now_millis();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    if limit == 0 {
                        occupied.remove();
                        return Ok(BoundedIncrement::AtLimit(Counter {
                            count: 0,
                            expires_at_ms: now,
                        }));
                    }
                    *entry = self.fresh_counter(window);
                    return entry.counter(key).map(BoundedIncrement::Incremented);
                }
                let current = entry.counter(key)?;
                if current.count >= limit {
                    return Ok(BoundedIncrement::AtLimit(current));
                }
                entry.value = Value::Count(current.count + 1);
                entry.counter(key).map(BoundedIncrement::Incremented)
            }
            MapEntry::Vacant(vacant) => {
                if limit == 0 {
                    return Ok(BoundedIncrement::AtLimit(Counter {
                        count: 0,
                        expires_at_ms: now,
                    }));
                }
                let entry = vacant.insert(self.fresh_counter(window));
                entry.counter(key).map(BoundedIncrement::Incremented)
            }
        }
    }

    async fn counter(&self, key: &str) -> StoreResult<Option<Counter>> {
        self.live(key).map(|e| e.counter(key)).transpose()
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = self.clock.now_millis();
        Ok(self
            .live(key)
            .map(|e| Duration::from_millis(e.expires_at_ms.saturating_sub(now))))
    }

    async fn reap_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}
