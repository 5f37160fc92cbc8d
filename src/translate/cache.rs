//! In-memory LRU layer in front of the persistent translation cache.
//! Cache entries are immutable once written, so a memoized value never goes
//! stale and no TTL is needed; eviction is purely by capacity.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::normalize::CacheKey;

pub struct MemoryCache {
    inner: Mutex<LruCache<CacheKey, String>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, translated_text: String) {
        self.inner.lock().put(key, translated_text);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
