use crate::lru::LruCache;
use crate::{CacheError, CacheStats};
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;

/// Thread-safe LRU store.
///
/// One `Mutex` guards the whole cache, keeping a single global recency order.
/// Values are cloned out, so callers store `Arc<T>` and never hold the lock
/// while using a value.
pub struct SharedLru<K, V> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K, V> SharedLru<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        Ok(Self {
            inner: Mutex::new(LruCache::new(capacity)?),
        })
    }

    /// Look up a key, promoting it on hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key).cloned()
    }

    /// Insert or replace. Returns the evicted key, if any.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        self.inner.lock().put(key, value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}
