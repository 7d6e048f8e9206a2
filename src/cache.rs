//! A fixed-capacity least-recently-used cache.
//!
//! [`LruCache`] maps keys to values and remembers in which order the entries were last touched.
//! Both [`LruCache::set`] and [`LruCache::get`] count as a touch. When inserting a new key would
//! exceed the capacity, the entry that was touched least recently is evicted.
//!
//! The cache owns its synchronization: all methods take `&self`, and the key index and recency list
//! are always updated together under a single exclusive lock. Note that this includes
//! [`LruCache::get`], since a read reorders the recency list.
//!
//! ```
//! use runnel::LruCache;
//!
//! let cache = LruCache::new(2);
//! cache.set("a", 1);
//! cache.set("b", 2);
//! assert_eq!(cache.get(&"a"), Some(1));
//!
//! // "b" is now the least recently used entry, so it is evicted instead of "a".
//! cache.set("c", 3);
//! assert_eq!(cache.get(&"b"), None);
//! assert_eq!(cache.get(&"a"), Some(1));
//! ```

use std::{
    borrow::Borrow,
    collections::HashMap,
    error::Error,
    fmt,
    hash::Hash,
};

use crate::{
    list::{NodeRef, OrderingList},
    sync::Mutex,
};

/// A thread-safe, fixed-capacity cache that evicts the least recently used entry.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    /// Points every cached key at its node in `order`.
    index: HashMap<K, NodeRef>,
    /// Front is the most recently touched entry, back is the next one to be evicted.
    order: OrderingList<(K, V)>,
}

impl<K, V> Inner<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            order: OrderingList::with_capacity(capacity),
        }
    }
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Creates an empty cache holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// This method will panic if `capacity` is 0. Use [`LruCache::try_new`] to handle that case
    /// without panicking.
    pub fn new(capacity: usize) -> Self {
        assert_ne!(capacity, 0, "capacity must be at least 1");
        Self {
            capacity,
            inner: Mutex::new(Inner::new(capacity)),
        }
    }

    /// Creates an empty cache holding at most `capacity` entries, or returns [`ZeroCapacity`] if
    /// `capacity` is 0.
    pub fn try_new(capacity: usize) -> Result<Self, ZeroCapacity> {
        if capacity == 0 {
            return Err(ZeroCapacity);
        }
        Ok(Self::new(capacity))
    }

    /// Inserts or updates the value for `key`, marking it as the most recently used entry.
    ///
    /// Returns `true` if `key` was already cached (its value is replaced), and `false` if a new
    /// entry was created. Creating an entry in a full cache evicts the least recently used one.
    pub fn set(&self, key: K, value: V) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(&node) = inner.index.get(&key) {
            if let Some(entry) = inner.order.get_mut(node) {
                entry.1 = value;
                // `node` was just resolved, so this can't fail.
                let _ = inner.order.move_to_front(node);
                return true;
            }
            // An index entry without a list node; forget it and insert afresh.
            inner.index.remove(&key);
        }

        let node = inner.order.push_front((key.clone(), value));
        inner.index.insert(key, node);

        if inner.order.len() > self.capacity {
            if let Some((evicted, _)) = inner.order.pop_back() {
                inner.index.remove(&evicted);
                log::trace!("evicted least recently used entry (capacity {})", self.capacity);
            }
        }
        debug_assert_eq!(inner.index.len(), inner.order.len());
        false
    }

    /// Returns a clone of the value cached for `key`, marking it as the most recently used entry.
    ///
    /// Returns [`None`] on a cache miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get_with(key, V::clone)
    }

    /// Calls a closure with a reference to the value cached for `key`, marking it as the most
    /// recently used entry.
    ///
    /// The closure should complete quickly, since it runs while the cache is locked. It must not
    /// access the cache itself, or it will deadlock.
    ///
    /// This method is available for any value type. If `V` implements [`Clone`], consider using
    /// [`LruCache::get`] instead.
    pub fn get_with<Q, R>(&self, key: &Q, f: impl FnOnce(&V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let node = *inner.index.get(key)?;
        if inner.order.move_to_front(node).is_err() {
            inner.index.remove(key);
            return None;
        }
        inner.order.get(node).map(|(_, value)| f(value))
    }

    /// Removes every entry. The capacity is unchanged.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::new(self.capacity);
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of entries this cache holds.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("LruCache");
        s.field("capacity", &self.capacity);
        match self.inner.try_lock() {
            Ok(inner) => s.field("len", &inner.order.len()),
            Err(_) => s.field("len", &"<locked>"),
        }
        .finish_non_exhaustive()
    }
}

/// An error returned by [`LruCache::try_new`] when asked for a cache that can't hold any entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroCapacity;

impl Error for ZeroCapacity {}

impl fmt::Display for ZeroCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cache capacity must be at least 1")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::Arc,
        thread,
    };

    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    /// Keys from most to least recently used.
    fn recency<K: Clone, V>(cache: &LruCache<K, V>) -> Vec<K> {
        let inner = cache.inner.lock();
        inner.order.iter().map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn empty_cache() {
        let cache = LruCache::<String, i32>::new(10);
        assert_eq!(cache.get("aaa"), None);
        assert_eq!(cache.get("bbb"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn simple() {
        let cache = LruCache::new(5);

        assert!(!cache.set("aaa", 100));
        assert!(!cache.set("bbb", 200));

        assert_eq!(cache.get("aaa"), Some(100));
        assert_eq!(cache.get("bbb"), Some(200));

        assert!(cache.set("aaa", 300));
        assert_eq!(cache.get("aaa"), Some(300));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.get("ccc"), None);
    }

    #[test]
    fn evicts_first_inserted_when_untouched() {
        let cache = LruCache::new(3);
        for key in 0..4 {
            cache.set(key, key * 10);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn get_protects_from_eviction() {
        let cache = LruCache::new(2);
        cache.set('a', 1);
        cache.set('b', 2);
        assert_eq!(cache.get(&'a'), Some(1));

        cache.set('c', 3);
        assert_eq!(cache.get(&'b'), None);
        assert_eq!(cache.get(&'a'), Some(1));
        assert_eq!(cache.get(&'c'), Some(3));
    }

    #[test]
    fn set_protects_from_eviction() {
        let cache = LruCache::new(3);
        cache.set(1, "one");
        cache.set(2, "two");
        cache.set(3, "three");
        assert_eq!(recency(&cache), [3, 2, 1]);

        assert!(cache.set(1, "uno"));
        assert_eq!(recency(&cache), [1, 3, 2]);

        cache.set(4, "four");
        assert_eq!(recency(&cache), [4, 1, 3]);
        assert_eq!(cache.get(&1), Some("uno"));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let cache = LruCache::new(4);
        for i in 0..100 {
            cache.set(i % 7, i);
            assert!(cache.len() <= cache.capacity());
            let inner = cache.inner.lock();
            assert_eq!(inner.index.len(), inner.order.len());
        }
    }

    #[test]
    fn clear() {
        let cache = LruCache::new(3);
        cache.set("aaa", 100);
        cache.set("bbb", 200);
        assert!(cache.set("aaa", 300));

        cache.clear();
        assert_eq!(cache.get("aaa"), None);
        assert_eq!(cache.get("bbb"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 3);

        for key in ["x", "y", "z"] {
            assert!(!cache.set(key, 1));
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("x"), Some(1));
    }

    #[test]
    fn get_with_non_clone_values() {
        struct Opaque(u32);

        let cache = LruCache::new(1);
        cache.set("k", Opaque(7));
        assert_eq!(cache.get_with("k", |v| v.0), Some(7));
        assert_eq!(cache.get_with("missing", |v| v.0), None);
    }

    #[test]
    fn zero_capacity() {
        assert_eq!(LruCache::<u8, u8>::try_new(0).err(), Some(ZeroCapacity));
        assert!(LruCache::<u8, u8>::try_new(1).is_ok());
        catch_unwind(AssertUnwindSafe(|| LruCache::<u8, u8>::new(0))).unwrap_err();
    }

    #[test]
    fn debug_output() {
        let cache = LruCache::new(2);
        cache.set(1, 1);
        assert_eq!(
            format!("{cache:?}"),
            "LruCache { capacity: 2, len: 1, .. }"
        );
    }

    #[test]
    fn cache_is_send_sync() {
        assert_send_sync::<LruCache<String, Vec<u8>>>();
    }

    #[test]
    fn concurrent_set_and_get() {
        let cache = Arc::new(LruCache::new(10));

        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..100_000 {
                    cache.set(i.to_string(), i);
                }
            })
        };
        let reader = {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..100_000u64 {
                    // Cheap deterministic scatter over the key space.
                    let key = (i.wrapping_mul(2_654_435_761) % 100_000).to_string();
                    if let Some(value) = cache.get(&key) {
                        assert_eq!(value.to_string(), key);
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(cache.len(), 10);
        assert_eq!(cache.get("99999"), Some(99_999));
        let inner = cache.inner.lock();
        assert_eq!(inner.index.len(), inner.order.len());
    }
}
