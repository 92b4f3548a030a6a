//! Expiring key→value storage behind the cache.
//!
//! [`KeyValueStore`] is the backend seam: the gate and populator only ever
//! talk to an `Arc<dyn KeyValueStore>` handed to them at construction, so a
//! networked backend can replace [`MemoryStore`] without touching either.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::policy::DEFAULT_MAX_BYTES;

/// Backend failures. Callers treat every variant as a cache miss.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// An asynchronous, expiring string store.
///
/// Implementations must synchronize internally: concurrent `get`/`set` on the
/// same key never expose a partially written value, and the last `set` wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`. With `ttl`, the value stops being
    /// returned by [`get`](Self::get) once `ttl` has elapsed; without it the
    /// value lives until evicted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Option<u64>,
}

impl Slot {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct Entries {
    lru: LruCache<String, Slot>,
    used_bytes: usize,
}

impl Entries {
    fn remove(&mut self, key: &str) {
        if let Some(slot) = self.lru.pop(key) {
            self.used_bytes = self.used_bytes.saturating_sub(footprint(key, &slot.value));
        }
    }

    fn insert(&mut self, key: &str, slot: Slot, max_bytes: usize) {
        let size = footprint(key, &slot.value);
        if let Some(previous) = self.lru.put(key.to_owned(), slot) {
            self.used_bytes = self.used_bytes.saturating_sub(footprint(key, &previous.value));
        }
        self.used_bytes += size;

        while self.used_bytes > max_bytes {
            let Some((evicted, slot)) = self.lru.pop_lru() else {
                break;
            };
            self.used_bytes = self.used_bytes.saturating_sub(footprint(&evicted, &slot.value));
            debug!(key = %evicted, "evicted least recently used entry");
        }
    }
}

// Approximate: string lengths only, not the in-memory layout.
fn footprint(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// In-process store bounded by approximate byte size, evicting least
/// recently used entries first. Expiration is checked on read.
///
/// # Examples
///
/// ```
/// use qcache::cache::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new(1_024);
/// store.set("k", "v".to_owned(), None).await.unwrap();
/// assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
/// # }
/// ```
pub struct MemoryStore {
    entries: Mutex<Entries>,
    max_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl MemoryStore {
    /// Creates a store holding roughly `max_bytes` of keys plus values.
    pub fn new(max_bytes: usize) -> Self {
        Self::with_clock(max_bytes, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new), reading expiration time from `clock`.
    pub fn with_clock(max_bytes: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                used_bytes: 0,
            }),
            max_bytes,
            clock,
        }
    }

    /// Returns the configured capacity in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes currently accounted to stored keys and values, expired entries
    /// that have not been read since included.
    pub fn used_bytes(&self) -> usize {
        self.lock().map(|entries| entries.used_bytes).unwrap_or(0)
    }

    /// Number of stored entries, expired ones that have not been read since
    /// included.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.lru.len()).unwrap_or(0)
    }

    /// Returns `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_owned()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_millis();
        let mut entries = self.lock()?;

        match entries.lru.get(key) {
            None => return Ok(None),
            Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.value.clone())),
            Some(_) => {}
        }

        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let expires_at = ttl.map(|ttl| {
            let ttl = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            now.saturating_add(ttl)
        });
        let mut entries = self.lock()?;

        if footprint(key, &value) > self.max_bytes {
            // Would flush everything else and then itself.
            entries.remove(key);
            debug!(key, bytes = value.len(), "value exceeds store capacity; not stored");
            return Ok(());
        }

        entries.insert(key, Slot { value, expires_at }, self.max_bytes);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
