use lru::LruCache as Inner;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Thread-safe LRU cache with O(1) get/set and predictable eviction.
///
/// `get` promotes the entry to most-recently-used; `set` evicts the
/// least-recently-used entry when full. Bounded by entry count.
pub struct LruCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    /// Panics if `max_size` is zero.
    pub fn new(max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size).expect("LRU capacity must be >= 1");
        Self {
            inner: Mutex::new(Inner::new(cap)),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        self.inner.lock().put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_set() {
        let cache: LruCache<String, u32> = LruCache::new(2);
        cache.set("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_eviction_order() {
        // Fill to capacity, touch the oldest key, then overflow: the oldest
        // *un-accessed* key is the one evicted.
        let cache: LruCache<String, u32> = LruCache::new(3);
        cache.set("a".into(), 1);
        cache.set("b".into(), 2);
        cache.set("c".into(), 3);

        cache.get(&"a".to_string()); // promote a
        cache.set("d".into(), 4); // evicts b

        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"c".to_string()), Some(3));
        assert_eq!(cache.get(&"d".to_string()), Some(4));
    }

    #[test]
    fn test_set_existing_updates() {
        let cache: LruCache<String, u32> = LruCache::new(2);
        cache.set("a".into(), 1);
        cache.set("a".into(), 9);
        assert_eq!(cache.get(&"a".to_string()), Some(9));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache: LruCache<String, u32> = LruCache::new(2);
        cache.set("a".into(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _: LruCache<String, u32> = LruCache::new(0);
    }
}
