//! Frame-pinned resource cache
//!
//! An [`LruCache`] whose slots are either resources or per-frame marker
//! sentinels. A marker is inserted when a frame starts; everything touched
//! afterwards sits in front of it in recency order. Expiry walks from the tail
//! and stops when it reaches the marker of the frame it runs for, so resources
//! used by the in-flight frame are never released mid-frame.

use std::hash::Hash;

use crate::lru::LruCache;

/// Key of a slot in a [`FramePinnedCache`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotKey<K> {
    /// Sentinel pinning the frame with this index
    Marker(u64),
    /// A cached resource
    Entry(K),
}

enum Slot<V> {
    Marker,
    Resource(V),
}

/// Statistics for a frame-pinned cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinnedCacheStats {
    /// Live resources (markers excluded)
    pub resource_count: usize,
    /// Frame markers currently outstanding
    pub marker_count: usize,
    pub high_water_mark: usize,
    /// Resources released by expiry passes
    pub evictions: u64,
}

/// LRU cache with frame markers and high-water-mark expiry
pub struct FramePinnedCache<K, V> {
    lru: LruCache<SlotKey<K>, Slot<V>>,
    high_water_mark: usize,
    markers: usize,
    /// Frame whose marker is in the list, if any
    pinned_frame: Option<u64>,
    evictions: u64,
}

impl<K, V> FramePinnedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache that holds up to `high_water_mark` resources between expiry passes
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            // Expiry is driven from here, the inner mark stays disabled
            lru: LruCache::new(0),
            high_water_mark,
            markers: 0,
            pinned_frame: None,
            evictions: 0,
        }
    }

    /// Pin the frame with the given index
    ///
    /// The marker of the previously pinned frame is dropped, so at most one
    /// marker is outstanding. Calling this twice for the same frame is a
    /// no-op.
    pub fn begin_frame(&mut self, frame_index: u64) {
        if self.pinned_frame == Some(frame_index) {
            return;
        }
        if let Some(previous) = self.pinned_frame.take() {
            if self.lru.remove(&SlotKey::Marker(previous)).is_some() {
                self.markers -= 1;
            }
        }
        self.lru.set(SlotKey::Marker(frame_index), Slot::Marker);
        self.markers += 1;
        self.pinned_frame = Some(frame_index);
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.lru.len() - self.markers
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn marker_count(&self) -> usize {
        self.markers
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub fn set_high_water_mark(&mut self, high_water_mark: usize) {
        self.high_water_mark = high_water_mark;
    }

    /// Whether live resources exceed the high-water mark
    pub fn needs_expiry(&self) -> bool {
        self.high_water_mark > 0 && self.len() > self.high_water_mark
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lru.contains_key(&SlotKey::Entry(key.clone()))
    }

    /// Get a resource and mark it as used by the current frame
    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.lru.get(&SlotKey::Entry(key.clone())) {
            Some(Slot::Resource(value)) => Some(value),
            _ => None,
        }
    }

    /// Get a resource without updating recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        match self.lru.peek(&SlotKey::Entry(key.clone())) {
            Some(Slot::Resource(value)) => Some(value),
            _ => None,
        }
    }

    /// Insert a resource as most recently used, returning the one it replaced
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        match self.lru.set(SlotKey::Entry(key), Slot::Resource(value)) {
            Some(Slot::Resource(previous)) => Some(previous),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        match self.lru.remove(&SlotKey::Entry(key.clone())) {
            Some(Slot::Resource(value)) => Some(value),
            _ => None,
        }
    }

    /// Release resources from the tail until within the high-water mark
    ///
    /// Markers of frames older than `current_frame` are dropped on the way;
    /// the marker of `current_frame` ends the pass. Each released resource is
    /// handed to `release`. Returns the number of resources released.
    pub fn expire<F>(&mut self, current_frame: u64, mut release: F) -> usize
    where
        F: FnMut(K, V),
    {
        let mut released = 0;
        while self.needs_expiry() {
            match self.lru.peek_last_key() {
                Some(SlotKey::Marker(frame)) if *frame == current_frame => {
                    tracing::trace!(frame = current_frame, "expiry reached current frame marker");
                    break;
                }
                Some(SlotKey::Marker(frame)) => {
                    debug_assert!(
                        *frame < current_frame,
                        "marker for frame {} outlived expiry of older frame {}",
                        frame,
                        current_frame
                    );
                    let frame = *frame;
                    self.lru.pop();
                    self.markers -= 1;
                    if self.pinned_frame == Some(frame) {
                        self.pinned_frame = None;
                    }
                }
                Some(SlotKey::Entry(_)) => {
                    if let Some((SlotKey::Entry(key), Slot::Resource(value))) = self.lru.pop() {
                        release(key, value);
                        released += 1;
                    }
                }
                None => break,
            }
        }
        self.evictions += released as u64;
        released
    }

    /// Drop every slot without handing resources to a release callback
    pub fn clear(&mut self) {
        self.lru.clear();
        self.markers = 0;
        self.pinned_frame = None;
    }

    /// Remove every resource, returning them least recently used last
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.len());
        for (key, slot) in self.lru.retain(|_, _| false) {
            if let (SlotKey::Entry(key), Slot::Resource(value)) = (key, slot) {
                drained.push((key, value));
            }
        }
        self.markers = 0;
        self.pinned_frame = None;
        drained
    }

    /// Remove every resource matching `predicate`, returning them
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<(K, V)>
    where
        F: FnMut(&K) -> bool,
    {
        let removed = self.lru.retain(|key, _| match key {
            SlotKey::Entry(key) => !predicate(key),
            SlotKey::Marker(_) => true,
        });
        removed
            .into_iter()
            .filter_map(|(key, slot)| match (key, slot) {
                (SlotKey::Entry(key), Slot::Resource(value)) => Some((key, value)),
                _ => None,
            })
            .collect()
    }

    /// Resource keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.lru.keys().filter_map(|key| match key {
            SlotKey::Entry(key) => Some(key),
            SlotKey::Marker(_) => None,
        })
    }

    pub fn stats(&self) -> PinnedCacheStats {
        PinnedCacheStats {
            resource_count: self.len(),
            marker_count: self.markers,
            high_water_mark: self.high_water_mark,
            evictions: self.evictions,
        }
    }
}
