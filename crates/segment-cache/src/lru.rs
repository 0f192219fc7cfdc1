use crate::arena::{Arena, Node};
use crate::{CacheError, CacheStats};
use ahash::AHashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// LRU (Least Recently Used) store with a fixed entry capacity.
///
/// `get` and `put` move the touched entry to the head of the recency list;
/// inserting a new key at capacity evicts the tail. Recency is a total order,
/// so exactly one entry is ever the eviction candidate.
///
/// All methods take `&mut self` except the read-only ones. Thread safety is
/// handled by [`crate::SharedLru`].
pub struct LruCache<K, V> {
    arena: Arena<K, V>,
    map: AHashMap<K, u32>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 || capacity >= crate::arena::NIL as usize {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        Ok(Self {
            arena: Arena::new(capacity),
            map: AHashMap::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        })
    }

    /// Look up a key and mark it most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(&index) = self.map.get(key) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        self.arena.move_to_head(index);
        self.arena.get(index).map(|node| &node.value)
    }

    /// Insert or overwrite. The entry becomes most recently used either way;
    /// only a new key at capacity evicts.
    pub fn put(&mut self, key: K, value: V) -> Option<K> {
        if let Some(&index) = self.map.get(&key) {
            if let Some(node) = self.arena.get_mut(index) {
                node.value = value;
            }
            self.arena.move_to_head(index);
            return None;
        }

        let mut evicted = None;
        if self.arena.len() >= self.capacity {
            if let Some((_, node)) = self.arena.pop_tail() {
                self.map.remove(&node.key);
                self.evictions += 1;
                evicted = Some(node.key);
            }
        }

        if let Some(index) = self.arena.push_head(Node::new(key.clone(), value)) {
            self.map.insert(key, index);
        }
        evicted
    }

    /// Membership check that leaves recency untouched.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Read without promoting. Used for introspection only.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let &index = self.map.get(key)?;
        self.arena.get(index).map(|node| &node.value)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.arena.keys_by_recency().into_iter().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            current_size: self.arena.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, keys: &[&str]) -> LruCache<String, u32> {
        let mut cache = LruCache::new(capacity).unwrap();
        for (i, k) in keys.iter().enumerate() {
            cache.put(k.to_string(), i as u32);
        }
        cache
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = LruCache::<String, u32>::new(0);
        assert!(matches!(result, Err(CacheError::InvalidCapacity(0))));
    }

    #[test]
    fn basic_put_and_get() {
        let mut cache = filled(2, &["a", "b"]);
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
        assert_eq!(cache.get("a"), Some(&0));
        assert_eq!(cache.get("b"), Some(&1));
    }

    #[test]
    fn overflow_evicts_first_inserted() {
        let mut cache = filled(3, &["a", "b", "c"]);
        let evicted = cache.put("d".into(), 3);

        assert_eq!(evicted.as_deref(), Some("a"));
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_promotes_so_second_oldest_is_evicted() {
        let mut cache = filled(3, &["a", "b", "c"]);

        cache.get("a");
        cache.put("d".into(), 3);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn contains_does_not_promote() {
        let mut cache = filled(2, &["a", "b"]);

        assert!(cache.contains("a"));
        cache.put("c".into(), 2);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn overwrite_replaces_value_without_growing() {
        let mut cache = filled(2, &["a", "b"]);

        cache.put("a".into(), 10);
        cache.put("a".into(), 20);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(&20));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn overwrite_promotes() {
        let mut cache = filled(2, &["a", "b"]);

        cache.put("a".into(), 10);
        cache.put("c".into(), 2);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn recency_order_is_total() {
        let mut cache = filled(4, &["a", "b", "c", "d"]);
        cache.get("b");
        cache.put("c".into(), 7);

        assert_eq!(cache.keys(), vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn peek_does_not_count_or_promote() {
        let mut cache = filled(2, &["a", "b"]);

        assert_eq!(cache.peek("a"), Some(&0));
        cache.put("c".into(), 2);

        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn stats_tracking() {
        let mut cache = filled(2, &["a"]);
        cache.get("a"); // hit
        cache.get("z"); // miss
        cache.put("b".into(), 1);
        cache.put("c".into(), 2); // evicts "a"

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.current_size, 2);
        assert_eq!(stats.capacity, 2);
    }

    #[test]
    fn capacity_one_churns() {
        let mut cache = filled(1, &["a"]);
        for i in 0..100u32 {
            cache.put(format!("k{i}"), i);
            assert_eq!(cache.len(), 1);
        }
        assert_eq!(cache.get("k99"), Some(&99));
    }
}
