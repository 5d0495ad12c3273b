//! Generic thread-safe LRU cache with hit/miss/eviction accounting.
//!
//! [`LruCache`] backs the memoised analytics results (dominator trees keyed
//! on entry and graph version, segment-tree cache keys). Recency is a
//! doubly-linked list threaded through a slot arena, so `get`, `set` and
//! `delete` are O(1); the map and list live behind one mutex while the
//! statistics counters are atomics and therefore eventually consistent.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Capacity used when the caller asks for zero.
pub const DEFAULT_CAPACITY: usize = 100;

const NIL: usize = usize::MAX;

/// Hit/miss snapshot returned by [`LruCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    /// Most-recently-used slot.
    head: usize,
    /// Least-recently-used slot; evicted first.
    tail: usize,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn new() -> Self {
        Inner {
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap();
            (slot.prev, slot.next)
        };
        match prev {
            NIL => self.head = next,
            p => self.slots[p].as_mut().unwrap().next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.slots[n].as_mut().unwrap().prev = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        {
            let slot = self.slots[idx].as_mut().unwrap();
            slot.prev = NIL;
            slot.next = self.head;
        }
        if self.head != NIL {
            self.slots[self.head].as_mut().unwrap().prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn insert_slot(&mut self, key: K, value: V) -> usize {
        let slot = Slot {
            key,
            value,
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    /// Removes the least-recently-used entry. Caller guarantees non-empty.
    fn evict_tail(&mut self) {
        let idx = self.tail;
        self.unlink(idx);
        let slot = self.slots[idx].take().unwrap();
        self.map.remove(&slot.key);
        self.free.push(idx);
    }
}

/// A bounded LRU cache, safe for concurrent use.
///
/// Recency is updated on both `get` and `set`; exceeding capacity evicts
/// exactly the least-recently-used entry. All public operations may be
/// called concurrently; `purge` is serialised with respect to the others
/// through the same internal mutex.
pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Creates a cache holding at most `capacity` entries. A zero capacity
    /// falls back to [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        LruCache {
            inner: Mutex::new(Inner::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache with [`DEFAULT_CAPACITY`].
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Returns a clone of the cached value and marks the entry
    /// most-recently-used. Counts a hit or a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.get(key).copied() {
            Some(idx) => {
                inner.touch(idx);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(inner.slots[idx].as_ref().unwrap().value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Inserts or updates an entry, marking it most-recently-used.
    ///
    /// Updating an existing key does not change the cache size and never
    /// counts as an eviction. Inserting beyond capacity evicts exactly one
    /// entry, the least-recently-used.
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(idx) = inner.map.get(&key).copied() {
            inner.slots[idx].as_mut().unwrap().value = value;
            inner.touch(idx);
            return;
        }
        if inner.map.len() >= self.capacity {
            inner.evict_tail();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        let idx = inner.insert_slot(key.clone(), value);
        inner.map.insert(key, idx);
        inner.push_front(idx);
    }

    /// Removes an entry. Returns whether it existed.
    pub fn delete(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.map.remove(key) {
            Some(idx) => {
                inner.unlink(idx);
                inner.slots[idx] = None;
                inner.free.push(idx);
                true
            }
            None => false,
        }
    }

    /// Drops every entry and resets hits, misses and evictions to zero.
    pub fn purge(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Inner::new();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit/miss counters. Eventually consistent under concurrency.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Total entries evicted for capacity since creation or last purge.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_capacity_uses_default() {
        let cache: LruCache<u32, u32> = LruCache::new(0);
        for i in 0..DEFAULT_CAPACITY as u32 + 10 {
            cache.set(i, i);
        }
        assert_eq!(cache.len(), DEFAULT_CAPACITY);
        assert_eq!(cache.evictions(), 10);
    }

    #[test]
    fn get_returns_value_and_counts_hit() {
        let cache = LruCache::new(4);
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn set_existing_updates_without_eviction() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 0);
        assert_eq!(cache.get(&"a"), Some(10));
    }

    #[test]
    fn eviction_removes_least_recently_used() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        // Touch "a" so "b" becomes the LRU entry.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.evictions(), 1);
    }

    #[test]
    fn set_refreshes_recency_too() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        // Rewriting "a" makes "b" the LRU entry.
        cache.set("a", 11);
        cache.set("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(11));
    }

    #[test]
    fn delete_reports_existence() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        assert!(cache.delete(&"a"));
        assert!(!cache.delete(&"a"));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn delete_then_fill_does_not_corrupt_recency() {
        let cache = LruCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        assert!(cache.delete(&"b"));
        cache.set("d", 4);
        cache.set("e", 5); // evicts "a", the oldest survivor
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.get(&"d"), Some(4));
        assert_eq!(cache.get(&"e"), Some(5));
    }

    #[test]
    fn purge_resets_counters_and_length() {
        let cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        let _ = cache.get(&"c");
        let _ = cache.get(&"zzz");
        cache.purge();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats(), CacheStats { hits: 0, misses: 0 });
        assert_eq!(cache.evictions(), 0);
    }

    #[test]
    fn concurrent_access_is_safe() {
        let cache: Arc<LruCache<u64, u64>> = Arc::new(LruCache::new(64));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for i in 0..500u64 {
                    cache.set(t * 1000 + i, i);
                    let _ = cache.get(&(t * 1000 + i));
                    if i % 7 == 0 {
                        cache.delete(&(t * 1000 + i));
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }
}
