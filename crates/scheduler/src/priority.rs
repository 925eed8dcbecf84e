//! Keyed, reprioritizable priority queue
//!
//! Elements are dequeued lowest priority value first, FIFO among equal
//! priorities. Priorities are not fixed at insertion: [`PriorityQueue::reprioritize`]
//! recomputes them from the payloads' current state and drops elements whose
//! new priority is [`DROP`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::hash::Hash;

use tessera_render::Coordinate;

/// Priority value that removes an element from the queue
pub const DROP: f64 = f64::INFINITY;

/// Weight of the zoom term in [`tile_priority`]
pub const RESOLUTION_WEIGHT: f64 = 65536.0;

/// Load priority of a tile
///
/// Coarser levels always come before finer ones; within a level, tiles
/// closer to `focus` come first. Distances are measured in pixels of the
/// tile's own level.
pub fn tile_priority(tile_center: &Coordinate, tile_resolution: f64, focus: &Coordinate) -> f64 {
    RESOLUTION_WEIGHT * (1.0 / tile_resolution).ln() + tile_center.distance(focus) / tile_resolution
}

struct Element<K, T> {
    key: K,
    payload: T,
    priority: f64,
    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl<K, T> PartialEq for Element<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K, T> Eq for Element<K, T> {}

impl<K, T> PartialOrd for Element<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K, T> Ord for Element<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: lower priority values and earlier
        // insertions must compare greater
        match other.priority.total_cmp(&self.priority) {
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            ordering => ordering,
        }
    }
}

/// Min-priority queue with unique keys
pub struct PriorityQueue<K, T> {
    /// Binary heap for priority-ordered elements
    heap: BinaryHeap<Element<K, T>>,

    /// Keys currently queued
    queued: HashSet<K>,

    /// Insertion counter (for FIFO ordering within same priority)
    insertion_counter: u64,
}

impl<K, T> PriorityQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Create a new empty priority queue
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            queued: HashSet::new(),
            insertion_counter: 0,
        }
    }

    /// Add an element
    ///
    /// Returns `false` without queueing when the key is already queued or the
    /// priority is [`DROP`].
    pub fn enqueue(&mut self, key: K, payload: T, priority: f64) -> bool {
        if priority == DROP || self.queued.contains(&key) {
            return false;
        }
        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;
        self.queued.insert(key.clone());
        self.heap.push(Element {
            key,
            payload,
            priority,
            insertion_order,
        });
        true
    }

    /// Remove the element with the lowest priority value
    pub fn dequeue(&mut self) -> Option<(K, T, f64)> {
        let element = self.heap.pop()?;
        self.queued.remove(&element.key);
        Some((element.key, element.payload, element.priority))
    }

    /// Look at the next element without removing it
    pub fn peek(&self) -> Option<(&K, &T, f64)> {
        self.heap
            .peek()
            .map(|element| (&element.key, &element.payload, element.priority))
    }

    /// Recompute every priority and restore heap order
    ///
    /// Elements whose new priority is [`DROP`] are removed.
    pub fn reprioritize<F>(&mut self, mut priority: F) -> usize
    where
        F: FnMut(&K, &T) -> f64,
    {
        let mut elements = std::mem::take(&mut self.heap).into_vec();
        let before = elements.len();
        elements.retain_mut(|element| {
            element.priority = priority(&element.key, &element.payload);
            element.priority != DROP
        });
        let dropped = before - elements.len();
        if dropped > 0 {
            self.queued = elements.iter().map(|element| element.key.clone()).collect();
        }
        self.heap = BinaryHeap::from(elements);
        dropped
    }

    /// Remove the elements matching `predicate`, keeping their priorities
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &T) -> bool,
    {
        let mut elements = std::mem::take(&mut self.heap).into_vec();
        let before = elements.len();
        elements.retain(|element| {
            let remove = predicate(&element.key, &element.payload);
            if remove {
                self.queued.remove(&element.key);
            }
            !remove
        });
        self.heap = BinaryHeap::from(elements);
        before - self.heap.len()
    }

    pub fn is_key_queued(&self, key: &K) -> bool {
        self.queued.contains(key)
    }

    /// Get the number of queued elements
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }

    /// Queued keys in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.heap.iter().map(|element| &element.key)
    }
}

impl<K, T> Default for PriorityQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
