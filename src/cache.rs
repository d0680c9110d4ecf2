//! Process-scoped TTL cache.
//!
//! Components that memoize upstream lookups (access tokens, brand subdomains)
//! receive an `Arc<dyn TtlCache<V>>` at construction time instead of reaching
//! for a global, so tests can hand each component a fresh cache.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Get/set-with-TTL cache abstraction.
pub trait TtlCache<V>: Send + Sync {
    /// Returns the value for `key` if present and not expired.
    fn get(&self, key: &str) -> Option<V>;
    /// Stores `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: V, ttl: Duration);
    /// Drops `key` if present.
    fn invalidate(&self, key: &str);
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded in-memory cache; least recently used entries are evicted first.
pub struct InMemoryTtlCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
}

impl<V> InMemoryTtlCache<V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> TtlCache<V> for InMemoryTtlCache<V>
where
    V: Clone + Send,
{
    fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.lock()
            .put(key.to_string(), Entry { value, expires_at });
    }

    fn invalidate(&self, key: &str) {
        self.lock().pop(key);
    }
}
