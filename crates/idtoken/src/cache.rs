//! Key cache abstraction
//!
//! The key-set fetcher stores parsed key sets here, keyed by their source URL.
//! Eviction policy belongs to the implementation the caller picks:
//!
//! - [`NoopKeyCache`] - never stores anything, every lookup misses
//! - [`MemoryKeyCache`] - concurrent map, entries live until overwritten
//! - [`TtlKeyCache`] - bounded cache whose entries expire after a TTL
//!
//! Implementations must be safe to share between threads; the cache is the
//! only mutable state verifiers share.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache;

use crate::jwks::KeySet;

/// Default TTL for [`TtlKeyCache`] (10 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default capacity for [`TtlKeyCache`].
pub const DEFAULT_CACHE_CAPACITY: u64 = 1_000;

/// A get/put key-value store.
pub trait KeyCache<V>: Send + Sync + fmt::Debug {
    /// Look up a value; `None` when absent or expired.
    fn get(&self, key: &str) -> Option<V>;

    /// Store a value, replacing any previous entry.
    fn put(&self, key: &str, value: V);

    /// Whether a `put` can be observed by a later `get`.
    ///
    /// Fetchers only serialise concurrent misses for caches that store.
    fn stores_entries(&self) -> bool {
        true
    }
}

/// Key cache shared between fetchers.
pub type SharedKeyCache = Arc<dyn KeyCache<Arc<KeySet>>>;

/// Cache that stores nothing.
///
/// A fetcher using it performs a network request on every call, and
/// concurrent calls are not collapsed into one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKeyCache;

impl<V> KeyCache<V> for NoopKeyCache {
    fn get(&self, _key: &str) -> Option<V> {
        None
    }

    fn put(&self, _key: &str, _value: V) {}

    fn stores_entries(&self) -> bool {
        false
    }
}

/// Unbounded in-memory cache without expiry.
#[derive(Debug)]
pub struct MemoryKeyCache<V> {
    entries: DashMap<String, V>,
}

impl<V> MemoryKeyCache<V> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<V> Default for MemoryKeyCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> KeyCache<V> for MemoryKeyCache<V>
where
    V: Clone + Send + Sync + fmt::Debug,
{
    fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: &str, value: V) {
        self.entries.insert(key.to_string(), value);
    }
}

/// Bounded cache with time-to-live expiry.
///
/// Stale entries are served until their TTL elapses; there is no other
/// invalidation.
pub struct TtlKeyCache<V> {
    inner: Cache<String, V>,
    ttl: Duration,
}

impl<V> TtlKeyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with the default capacity and the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache with an explicit capacity.
    pub fn with_capacity(ttl: Duration, capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.invalidate_all();
    }
}

impl<V> Default for TtlKeyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl<V> fmt::Debug for TtlKeyCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlKeyCache")
            .field("ttl", &self.ttl)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

impl<V> KeyCache<V> for TtlKeyCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: V) {
        self.inner.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_noop_cache_always_misses() {
        let cache = NoopKeyCache;
        KeyCache::<String>::put(&cache, "https://auth.example.com/jwks", "keys".to_string());
        assert_eq!(
            KeyCache::<String>::get(&cache, "https://auth.example.com/jwks"),
            None
        );
        assert!(!KeyCache::<String>::stores_entries(&cache));
        assert!(KeyCache::<String>::stores_entries(&MemoryKeyCache::<String>::new()));
    }

    #[test]
    fn test_memory_cache_put_replaces() {
        let cache = MemoryKeyCache::new();
        cache.put("a", 1);
        cache.put("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_cache_expires_entries() {
        let cache = TtlKeyCache::new(Duration::from_millis(50));
        cache.put("a", "value".to_string());
        assert_eq!(cache.get("a").as_deref(), Some("value"));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_ttl_cache_default_ttl() {
        let cache: TtlKeyCache<u32> = TtlKeyCache::default();
        assert_eq!(cache.ttl(), DEFAULT_CACHE_TTL);
    }

    #[test]
    fn test_concurrent_get_put() {
        let cache: Arc<MemoryKeyCache<usize>> = Arc::new(MemoryKeyCache::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..100 {
                        let key = format!("key-{}", j % 10);
                        cache.put(&key, i);
                        assert!(cache.get(&key).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
