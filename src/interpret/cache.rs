//! In-memory LRU intent cache with TTL.
//! Key: blake3 hash of (kind | locale | normalized input). Only resolved
//! intents are cached; a transient gateway failure must not pin a miss.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::{InputKind, NavigationIntent};

struct CacheEntry {
    intent: NavigationIntent,
    inserted_at: Instant,
}

pub struct IntentCache {
    inner: Mutex<LruCache<[u8; 32], CacheEntry>>,
    ttl: Duration,
}

impl IntentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Compute the cache key. The current index is deliberately excluded:
    /// intents are positional-independent, boundary handling belongs to the
    /// flipbook.
    pub fn compute_key(kind: InputKind, locale: &str, normalized: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(locale.as_bytes());
        hasher.update(b"|");
        hasher.update(normalized.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Look up a cached intent. Returns None if absent or expired.
    pub fn get(&self, key: &[u8; 32]) -> Option<NavigationIntent> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.intent);
            }
            cache.pop(key);
        }
        None
    }

    pub fn insert(&self, key: [u8; 32], intent: NavigationIntent) {
        let mut cache = self.inner.lock();
        cache.put(
            key,
            CacheEntry {
                intent,
                inserted_at: Instant::now(),
            },
        );
    }
}
