//! Tile load queue
//!
//! Tiles wanted by a frame are queued with their load priority. After each
//! frame the queue is reprioritized against the frame's wanted tiles and
//! drained into loads, keeping the number of loads in flight under a soft cap.

use std::collections::HashSet;

use tessera_render::{Coordinate, SourceKey, SourceRegistry, TileCoord, TileKey, TileState, TileStateChange};
use tracing::{debug, trace};

use crate::frame::WantedTiles;
use crate::priority::{tile_priority, PriorityQueue, DROP};

/// A tile waiting for its load
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedTile {
    pub key: TileKey,

    /// Center of the requested tile in map units
    pub center: Coordinate,

    /// Resolution of the tile's level
    pub resolution: f64,
}

/// Load priority of `tile` for a frame; [`DROP`] when the frame no longer wants it
pub fn queued_tile_priority(tile: &QueuedTile, wanted: &WantedTiles, focus: &Coordinate) -> f64 {
    let is_wanted = wanted
        .get(&tile.key.source)
        .is_some_and(|coords| coords.contains(&tile.key.coord));
    if !is_wanted {
        return DROP;
    }
    tile_priority(&tile.center, tile.resolution, focus)
}

/// Tile queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileQueueStats {
    /// Loads started
    pub loads_started: u64,

    /// Loads that reached a settled state
    pub loads_finished: u64,

    /// Queued tiles dropped by reprioritization
    pub dropped: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Loads currently in flight
    pub tiles_loading: usize,
}

/// Outcome of one [`TileQueue::load_more_tiles`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Loads started by this call
    pub started: usize,

    /// Dequeued tiles found aborted
    pub aborted: usize,
}

impl LoadSummary {
    /// Aborted tiles were dropped without starting anything new, so another
    /// frame is needed to pick up replacements
    pub fn needs_render(&self) -> bool {
        self.started == 0 && self.aborted > 0
    }
}

/// Priority queue of tile loads with in-flight tracking
#[derive(Default)]
pub struct TileQueue {
    queue: PriorityQueue<TileKey, QueuedTile>,
    loading: HashSet<TileKey>,
    stats: TileQueueStats,
}

impl TileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a tile with its priority for the given frame
    ///
    /// Returns `false` when it is already queued or not wanted.
    pub fn enqueue(&mut self, tile: QueuedTile, wanted: &WantedTiles, focus: &Coordinate) -> bool {
        let priority = queued_tile_priority(&tile, wanted, focus);
        let queued = self.queue.enqueue(tile.key, tile, priority);
        if queued {
            trace!(source = %tile.key.source, coord = %tile.key.coord, priority, "tile queued");
        }
        queued
    }

    pub fn is_key_queued(&self, key: &TileKey) -> bool {
        self.queue.is_key_queued(key)
    }

    /// Recompute priorities against a new frame; returns the number dropped
    pub fn reprioritize(&mut self, wanted: &WantedTiles, focus: &Coordinate) -> usize {
        let dropped = self
            .queue
            .reprioritize(|_, tile| queued_tile_priority(tile, wanted, focus));
        self.stats.dropped += dropped as u64;
        if dropped > 0 {
            debug!(dropped, remaining = self.queue.len(), "dropped unwanted tiles from queue");
        }
        dropped
    }

    /// Start loads in priority order
    ///
    /// Stops once `max_total_loading` loads are in flight, `max_new_loads`
    /// were started by this call, or the queue is empty. Aborted tiles are
    /// discarded; tiles no longer idle are skipped.
    pub fn load_more_tiles(
        &mut self,
        max_total_loading: usize,
        max_new_loads: usize,
        sources: &mut SourceRegistry,
    ) -> LoadSummary {
        let mut summary = LoadSummary::default();
        while self.loading.len() < max_total_loading && summary.started < max_new_loads {
            let Some((key, _, _)) = self.queue.dequeue() else {
                break;
            };
            let Some(source) = sources.get_mut(&key.source) else {
                trace!(source = %key.source, "dropping tile of removed source");
                continue;
            };
            match source.tile_state(&key.coord) {
                Some(TileState::Abort) => summary.aborted += 1,
                Some(TileState::Idle) if !self.loading.contains(&key) => {
                    if source.load_tile(&key.coord) {
                        self.loading.insert(key);
                        summary.started += 1;
                    }
                }
                _ => {}
            }
        }

        self.stats.loads_started += summary.started as u64;
        if summary.started > 0 {
            debug!(
                started = summary.started,
                loading = self.loading.len(),
                queued = self.queue.len(),
                "started tile loads"
            );
        }
        summary
    }

    /// Release load slots of tiles that settled
    ///
    /// Returns whether any of the changes concerned a tile this queue loaded.
    pub fn handle_tile_changes(&mut self, changes: &[TileStateChange]) -> bool {
        let mut finished = false;
        for change in changes {
            if change.state.is_settled() && self.loading.remove(&change.key) {
                self.stats.loads_finished += 1;
                finished = true;
            }
        }
        finished
    }

    /// Release load slots of tiles aborted by a cache sweep
    pub fn handle_aborted(&mut self, source: SourceKey, coords: &[TileCoord]) {
        for coord in coords {
            if self.loading.remove(&TileKey::new(source, *coord)) {
                self.stats.loads_finished += 1;
            }
        }
    }

    /// Forget every queued and in-flight tile of a source
    pub fn remove_source(&mut self, source: SourceKey) {
        self.loading.retain(|key| key.source != source);
        self.queue.remove_where(|key, _| key.source == source);
    }

    /// Number of loads in flight
    pub fn tiles_loading(&self) -> usize {
        self.loading.len()
    }

    pub fn is_loading(&self, key: &TileKey) -> bool {
        self.loading.contains(key)
    }

    /// Number of queued tiles
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every queued tile; loads in flight stay tracked
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn stats(&self) -> TileQueueStats {
        TileQueueStats {
            queue_size: self.queue.len(),
            tiles_loading: self.loading.len(),
            ..self.stats.clone()
        }
    }
}
