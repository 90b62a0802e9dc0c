//! TTL-keyed entity cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use vita_types::OwnerKey;

/// Cache lookup key: one owner's view of one collection, further
/// discriminated by a query shape (e.g. "list", "date:2024-01-01").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub owner: OwnerKey,
    pub collection: String,
    pub discriminator: String,
}

impl CacheKey {
    /// Creates a key for an arbitrary query shape.
    #[must_use]
    pub fn new(
        owner: OwnerKey,
        collection: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Self {
        Self {
            owner,
            collection: collection.into(),
            discriminator: discriminator.into(),
        }
    }

    /// The key for a collection's full owner-scoped list.
    #[must_use]
    pub fn list(owner: OwnerKey, collection: impl Into<String>) -> Self {
        Self::new(owner, collection, "list")
    }
}

struct Entry<T> {
    value: T,
    fetched_at: Instant,
    ttl: Duration,
}

impl<T> Entry<T> {
    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// In-memory keyed store with TTL expiry, shared process-wide.
///
/// `T` is whatever a fetch produces; `Option<Record>` when confirmed absence
/// is itself a cacheable answer, `Vec<Record>` for list queries. Entries use
/// the cache's default TTL unless stored with `set_with_ttl` (domains differ
/// in how long their data stays trustworthy). Expired entries are treated as
/// misses on read; `sweep_expired` only bounds memory.
pub struct EntityCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, Entry<T>>>,
}

impl<T: Clone> EntityCache<T> {
    /// Creates a cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key` if present and not expired.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<T> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Stores a value under the default TTL, replacing any previous entry.
    pub fn set(&self, key: CacheKey, value: T) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Stores a value with an entry-specific TTL.
    pub fn set_with_ttl(&self, key: CacheKey, value: T, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            Entry {
                value,
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drops the entry for one key.
    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Drops every entry belonging to an owner scope.
    pub fn invalidate_owner(&self, owner: &OwnerKey) {
        self.entries.lock().unwrap().retain(|k, _| k.owner != *owner);
    }

    /// Drops everything. Called on sign-out.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        if !entries.is_empty() {
            debug!(count = entries.len(), "clearing entity cache");
        }
        entries.clear();
    }

    /// Removes expired entries. Run opportunistically (e.g. on subscription
    /// teardown); reads never serve expired entries either way.
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| !e.is_expired());
    }

    /// Number of stored entries, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
