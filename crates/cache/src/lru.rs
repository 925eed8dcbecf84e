//! Keyed LRU store with high-water-mark eviction
//!
//! Entries live in an index arena and are linked from the most recently used
//! ("first") to the least recently used ("last") entry. Inserting never evicts
//! on its own: callers decide when to trim by checking [`LruCache::can_expire_cache`]
//! and then popping from the tail, which lets them protect entries that are still
//! referenced by the frame being drawn.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Default high-water mark, in entries
pub const DEFAULT_HIGH_WATER_MARK: usize = 2048;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    /// Neighbour towards the most recently used end
    newer: usize,
    /// Neighbour towards the least recently used end
    older: usize,
}

/// Statistics about LRU cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LruStats {
    /// Number of entries currently stored
    pub entry_count: usize,

    /// Configured high-water mark (0 disables expiry)
    pub high_water_mark: usize,

    /// Number of `get` calls that found their key
    pub hits: u64,

    /// Number of `get` calls that missed
    pub misses: u64,

    /// Number of entries removed through `pop`
    pub evictions: u64,
}

impl LruStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Capacity-bounded key/value store ordered by recency
///
/// # Example
///
/// ```
/// use tessera_cache::LruCache;
///
/// let mut cache = LruCache::new(2);
/// cache.set("a", 1);
/// cache.set("b", 2);
/// cache.set("c", 3);
///
/// // Reading "a" makes it the most recently used entry.
/// assert_eq!(cache.get("a"), Some(&1));
///
/// assert!(cache.can_expire_cache());
/// let expired = cache.prune();
/// assert_eq!(expired, vec![("b", 2)]);
/// ```
pub struct LruCache<K, V> {
    entries: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    newest: usize,
    oldest: usize,
    high_water_mark: usize,
    stats: LruStats,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty cache with the given high-water mark
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            entries: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            newest: NIL,
            oldest: NIL,
            high_water_mark,
            stats: LruStats {
                high_water_mark,
                ..Default::default()
            },
        }
    }

    /// Number of entries in the cache
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Change the high-water mark. Nothing is evicted until the next expiry pass.
    pub fn set_high_water_mark(&mut self, high_water_mark: usize) {
        self.high_water_mark = high_water_mark;
        self.stats.high_water_mark = high_water_mark;
    }

    /// Whether the entry count exceeds the high-water mark
    pub fn can_expire_cache(&self) -> bool {
        self.high_water_mark > 0 && self.len() > self.high_water_mark
    }

    /// Check for a key without updating recency
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Get a value and mark it as most recently used
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_mut(key).map(|value| &*value)
    }

    /// Get a mutable value and mark it as most recently used
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.get(key).copied() {
            Some(index) => {
                self.stats.hits += 1;
                self.touch(index);
                Some(&mut self.node_mut(index).value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Get a value without updating recency or statistics
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key).map(|&index| &self.node(index).value)
    }

    /// Get a mutable value without updating recency or statistics
    pub fn peek_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.entries.get(key).copied()?;
        Some(&mut self.node_mut(index).value)
    }

    /// Insert or overwrite a value, making it the most recently used entry
    ///
    /// Returns the previous value stored under `key`, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&index) = self.entries.get(&key) {
            self.touch(index);
            let previous = std::mem::replace(&mut self.node_mut(index).value, value);
            return Some(previous);
        }

        let index = self.alloc(Node {
            key: key.clone(),
            value,
            newer: NIL,
            older: NIL,
        });
        self.push_newest(index);
        self.entries.insert(key, index);
        self.stats.entry_count = self.entries.len();
        None
    }

    /// Get the value for `key`, inserting `create()` first if absent
    ///
    /// Either way the entry becomes the most recently used.
    pub fn get_or_insert_with<F>(&mut self, key: K, create: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let index = match self.entries.get(&key).copied() {
            Some(index) => {
                self.stats.hits += 1;
                self.touch(index);
                index
            }
            None => {
                self.stats.misses += 1;
                let index = self.alloc(Node {
                    key: key.clone(),
                    value: create(),
                    newer: NIL,
                    older: NIL,
                });
                self.push_newest(index);
                self.entries.insert(key, index);
                self.stats.entry_count = self.entries.len();
                index
            }
        };
        &mut self.node_mut(index).value
    }

    /// Overwrite the value of an existing entry, keeping its recency position
    ///
    /// Returns the previous value, or `None` (and stores nothing) if `key` is absent.
    pub fn replace(&mut self, key: &K, value: V) -> Option<V> {
        let index = self.entries.get(key).copied()?;
        Some(std::mem::replace(&mut self.node_mut(index).value, value))
    }

    /// Remove an entry
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.entries.remove(key)?;
        let node = self.take(index);
        self.stats.entry_count = self.entries.len();
        Some(node.value)
    }

    /// Least recently used entry
    pub fn peek_last(&self) -> Option<(&K, &V)> {
        if self.oldest == NIL {
            return None;
        }
        let node = self.node(self.oldest);
        Some((&node.key, &node.value))
    }

    /// Key of the least recently used entry
    pub fn peek_last_key(&self) -> Option<&K> {
        self.peek_last().map(|(key, _)| key)
    }

    /// Key of the most recently used entry
    pub fn peek_first_key(&self) -> Option<&K> {
        if self.newest == NIL {
            return None;
        }
        Some(&self.node(self.newest).key)
    }

    /// Remove and return the least recently used entry
    pub fn pop(&mut self) -> Option<(K, V)> {
        if self.oldest == NIL {
            return None;
        }
        let node = self.take(self.oldest);
        self.entries.remove(&node.key);
        self.stats.entry_count = self.entries.len();
        self.stats.evictions += 1;
        Some((node.key, node.value))
    }

    /// Pop entries from the tail while over the high-water mark
    ///
    /// Stops at the first tail entry for which `keep` returns true, so entries
    /// still referenced by the current frame survive even under pressure.
    pub fn expire_cache<F>(&mut self, mut keep: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut expired = Vec::new();
        while self.can_expire_cache() {
            match self.peek_last() {
                Some((key, value)) if keep(key, value) => break,
                Some(_) => {}
                None => break,
            }
            if let Some(entry) = self.pop() {
                expired.push(entry);
            }
        }
        expired
    }

    /// Pop entries from the tail until the count is within the high-water mark
    pub fn prune(&mut self) -> Vec<(K, V)> {
        self.expire_cache(|_, _| false)
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.nodes.clear();
        self.free.clear();
        self.newest = NIL;
        self.oldest = NIL;
        self.stats.entry_count = 0;
    }

    /// Iterate entries from most to least recently used
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.newest,
        }
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Values from most to least recently used
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Keep only the entries for which `f` returns true
    pub fn retain<F>(&mut self, mut f: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut removed = Vec::new();
        let mut cursor = self.newest;
        while cursor != NIL {
            let next = self.node(cursor).older;
            let keep = {
                let node = self.node_mut(cursor);
                f(&node.key, &mut node.value)
            };
            if !keep {
                let node = self.take(cursor);
                self.entries.remove(&node.key);
                removed.push((node.key, node.value));
            }
            cursor = next;
        }
        self.stats.entry_count = self.entries.len();
        removed
    }

    pub fn stats(&self) -> LruStats {
        self.stats
    }

    fn node(&self, index: usize) -> &Node<K, V> {
        self.nodes[index]
            .as_ref()
            .expect("linked index must point at a live node")
    }

    fn node_mut(&mut self, index: usize) -> &mut Node<K, V> {
        self.nodes[index]
            .as_mut()
            .expect("linked index must point at a live node")
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Unlink a node and release its arena slot
    fn take(&mut self, index: usize) -> Node<K, V> {
        self.unlink(index);
        let node = self.nodes[index]
            .take()
            .expect("linked index must point at a live node");
        self.free.push(index);
        node
    }

    fn unlink(&mut self, index: usize) {
        let (newer, older) = {
            let node = self.node(index);
            (node.newer, node.older)
        };
        if newer == NIL {
            self.newest = older;
        } else {
            self.node_mut(newer).older = older;
        }
        if older == NIL {
            self.oldest = newer;
        } else {
            self.node_mut(older).newer = newer;
        }
    }

    fn push_newest(&mut self, index: usize) {
        let previous_newest = self.newest;
        {
            let node = self.node_mut(index);
            node.newer = NIL;
            node.older = previous_newest;
        }
        if previous_newest == NIL {
            self.oldest = index;
        } else {
            self.node_mut(previous_newest).newer = index;
        }
        self.newest = index;
    }

    /// Move a node to the most recently used end
    fn touch(&mut self, index: usize) {
        if self.newest != index {
            self.unlink(index);
            self.push_newest(index);
        }
    }
}

impl<K, V> Default for LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK)
    }
}

/// Iterator over cache entries, most recently used first
pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = self.cache.node(self.cursor);
        self.cursor = node.older;
        Some((&node.key, &node.value))
    }
}
