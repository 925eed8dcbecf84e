//! Tile sources
//!
//! A [`TileSource`] owns the tiles of one layer's data: it creates them on
//! demand, starts loads through its [`TileLoader`], applies completions when
//! polled, and expires its decoded tile cache at the end of a frame.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use tessera_cache::{LruCache, DEFAULT_TILE_CACHE_SIZE};
use tracing::{debug, trace, warn};

use crate::extent::Projection;
use crate::grid::{TileCoord, TileGrid, TileRange, ZDirection};
use crate::loader::{LoadCompletion, LoadRequest, TileCompletion, TileLoader};
use crate::tile::{Tile, TileState, DEFAULT_TRANSITION};

/// Identity of a tile source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey(u64);

impl SourceKey {
    /// Create a new unique source key
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SourceKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// A tile of a specific source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub source: SourceKey,
    pub coord: TileCoord,
}

impl TileKey {
    pub fn new(source: SourceKey, coord: TileCoord) -> Self {
        Self { source, coord }
    }
}

/// A tile changed state after a load completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileStateChange {
    pub key: TileKey,
    pub state: TileState,
}

/// Tiles removed by [`TileSource::expire_cache`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpireReport {
    /// Every tile removed from the cache
    pub evicted: Vec<TileCoord>,
    /// Removed tiles that were still loading
    pub aborted: Vec<TileCoord>,
}

impl ExpireReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Per-zoom ranges of tiles a frame used
pub type UsedRanges = HashMap<u8, TileRange>;

/// Tiled data source with its own decoded tile cache
pub struct TileSource {
    key: SourceKey,
    revision: u64,
    content_key: String,
    grid: Arc<TileGrid>,
    projection: Projection,
    tiles: LruCache<TileCoord, Tile>,
    loader: Box<dyn TileLoader>,
    sender: Sender<TileCompletion>,
    receiver: Receiver<TileCompletion>,
    z_direction: ZDirection,
    transition: Duration,
    wrap_x: bool,
    pixel_ratio: f32,
}

impl TileSource {
    /// Create a source; horizontal wrapping follows the projection
    pub fn new(grid: TileGrid, projection: Projection, loader: Box<dyn TileLoader>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let wrap_x = projection.is_global();
        Self {
            key: SourceKey::new(),
            revision: 0,
            content_key: String::new(),
            grid: Arc::new(grid),
            projection,
            tiles: LruCache::new(DEFAULT_TILE_CACHE_SIZE),
            loader,
            sender,
            receiver,
            z_direction: ZDirection::default(),
            transition: DEFAULT_TRANSITION,
            wrap_x,
            pixel_ratio: 1.0,
        }
    }

    /// High-water mark of the decoded tile cache
    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.tiles.set_high_water_mark(cache_size);
        self
    }

    pub fn with_z_direction(mut self, z_direction: ZDirection) -> Self {
        self.z_direction = z_direction;
        self
    }

    /// Cross-fade duration of new tiles
    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_wrap_x(mut self, wrap_x: bool) -> Self {
        self.wrap_x = wrap_x;
        self
    }

    pub fn key(&self) -> SourceKey {
        self.key
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Shared handle to the grid, usable while the source is borrowed mutably
    pub fn shared_grid(&self) -> Arc<TileGrid> {
        Arc::clone(&self.grid)
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn z_direction(&self) -> ZDirection {
        self.z_direction
    }

    pub fn cache_size(&self) -> usize {
        self.tiles.high_water_mark()
    }

    pub fn set_cache_size(&mut self, cache_size: usize) {
        self.tiles.set_high_water_mark(cache_size);
    }

    /// Number of cached tiles
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Content key; changing it starts a new revision
    pub fn content_key(&self) -> &str {
        &self.content_key
    }

    pub fn set_key(&mut self, key: impl Into<String>) {
        let key = key.into();
        if key != self.content_key {
            self.content_key = key;
            self.refresh();
        }
    }

    /// Start a new revision; cached tiles are replaced on next access and
    /// kept as interim tiles until their replacements load
    pub fn refresh(&mut self) {
        self.revision += 1;
        debug!(source = %self.key, revision = self.revision, "tile source refreshed");
    }

    /// Cache key for a requested coordinate
    pub fn cache_coord(&self, coord: TileCoord, projection: &Projection) -> TileCoord {
        if self.wrap_x {
            self.grid.wrap_x(coord, projection)
        } else {
            coord
        }
    }

    /// Get or create the tile for `(z, x, y)`
    ///
    /// Coordinates outside the grid yield an `Empty` tile. A cached tile from
    /// an older revision is replaced by a fresh one that keeps it as interim,
    /// and an aborted tile is replaced so it can be loaded again.
    pub fn get_tile(&mut self, z: u8, x: i64, y: i64, pixel_ratio: f32, projection: &Projection) -> &mut Tile {
        self.pixel_ratio = pixel_ratio;
        let coord = self.cache_coord(TileCoord::new(z, x, y), projection);
        let revision = self.revision;
        let transition = self.transition;
        let state = if self.grid.within_extent_and_z(&coord) {
            TileState::Idle
        } else {
            TileState::Empty
        };

        let tile = self.tiles.get_or_insert_with(coord, || {
            Tile::with_state(coord, revision, state).with_transition(transition)
        });
        if tile.revision() != revision || tile.state() == TileState::Abort {
            let previous = std::mem::replace(
                tile,
                Tile::with_state(coord, revision, state).with_transition(transition),
            );
            trace!(coord = %coord, revision, previous = ?previous.state(), "replacing stale tile");
            tile.set_interim(previous);
        }
        tile
    }

    /// Start loading a cached idle tile
    ///
    /// Returns whether a load was started.
    pub fn load_tile(&mut self, coord: &TileCoord) -> bool {
        let Some(tile) = self.tiles.peek_mut(coord) else {
            return false;
        };
        if !tile.load() {
            return false;
        }

        let request = LoadRequest {
            source: self.key,
            coord: *coord,
            revision: tile.revision(),
            pixel_ratio: self.pixel_ratio,
        };
        let completion = LoadCompletion::new(*coord, tile.revision(), self.sender.clone());
        trace!(source = %self.key, coord = %coord, "starting tile load");
        self.loader.load(request, completion);
        true
    }

    /// State of a cached tile, without touching it
    pub fn tile_state(&self, coord: &TileCoord) -> Option<TileState> {
        self.tiles.peek(coord).map(Tile::state)
    }

    /// Cached tile, without touching it
    pub fn peek_tile(&self, coord: &TileCoord) -> Option<&Tile> {
        self.tiles.peek(coord)
    }

    /// Cached tile for mutation, without touching it
    pub fn peek_tile_mut(&mut self, coord: &TileCoord) -> Option<&mut Tile> {
        self.tiles.peek_mut(coord)
    }

    /// Mark a cached tile as used without loading it
    pub fn use_tile(&mut self, z: u8, x: i64, y: i64, projection: &Projection) {
        let coord = self.cache_coord(TileCoord::new(z, x, y), projection);
        self.tiles.get(&coord);
    }

    /// Visit the loaded tiles of `range` at level `z`
    ///
    /// The visitor receives the requested (unwrapped) coordinate and may
    /// return `false` to not count a tile. Returns whether every tile of the
    /// range was loaded and counted.
    pub fn for_each_loaded_tile<F>(&mut self, z: u8, range: &TileRange, projection: &Projection, mut visitor: F) -> bool
    where
        F: FnMut(TileCoord, &Tile) -> bool,
    {
        let mut covered = true;
        for coord in range.coords(z) {
            let cache_coord = self.cache_coord(coord, projection);
            let loaded = match self.tiles.get(&cache_coord) {
                Some(tile) if tile.state() == TileState::Loaded => visitor(coord, tile),
                _ => false,
            };
            if !loaded {
                covered = false;
            }
        }
        covered
    }

    /// Apply pending load completions
    ///
    /// Completions for tiles no longer cached are ignored.
    pub fn poll_completions(&mut self) -> Vec<TileStateChange> {
        let mut changes = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            let TileCompletion {
                coord,
                revision,
                outcome,
            } = completion;

            if let Err(err) = &outcome {
                warn!(source = %self.key, coord = %coord, error = %err, "tile load failed");
            }

            let Some(tile) = self
                .tiles
                .peek_mut(&coord)
                .and_then(|tile| tile.revision_mut(revision))
            else {
                trace!(coord = %coord, "ignoring completion for evicted tile");
                continue;
            };

            if let Some(state) = tile.finish_load(outcome) {
                changes.push(TileStateChange {
                    key: TileKey::new(self.key, coord),
                    state,
                });
            }
        }
        changes
    }

    /// Whether the cache exceeds its high-water mark
    pub fn can_expire_cache(&self) -> bool {
        self.tiles.can_expire_cache()
    }

    /// End-of-frame cache sweep
    ///
    /// Idle and loading tiles that are neither wanted nor inside the used
    /// ranges are aborted and removed, whatever the cache size. Aborted tiles
    /// left from earlier frames go too unless wanted again. Then tiles are
    /// evicted from the least recently used end while over the high-water
    /// mark, stopping at the first tile used or wanted this frame. Evicting a
    /// tile that is still loading aborts it.
    pub fn expire_cache(&mut self, used: Option<&UsedRanges>, wanted: Option<&HashSet<TileCoord>>) -> ExpireReport {
        let is_wanted = |coord: &TileCoord| wanted.is_some_and(|wanted| wanted.contains(coord));
        let in_use = |coord: &TileCoord| {
            used.and_then(|ranges| ranges.get(&coord.z))
                .is_some_and(|range| range.contains(coord))
                || is_wanted(coord)
        };

        let mut report = ExpireReport::default();
        let removed = self.tiles.retain(|coord, tile| {
            if is_wanted(coord) {
                return true;
            }
            match tile.state() {
                TileState::Abort => false,
                TileState::Idle | TileState::Loading if !in_use(coord) => {
                    if tile.state() == TileState::Loading {
                        report.aborted.push(*coord);
                    }
                    tile.abort();
                    false
                }
                _ => true,
            }
        });
        report.evicted.extend(removed.into_iter().map(|(coord, _)| coord));

        while self.tiles.can_expire_cache() {
            match self.tiles.peek_last_key() {
                Some(coord) if in_use(coord) => break,
                Some(_) => {}
                None => break,
            }
            let Some((coord, mut tile)) = self.tiles.pop() else {
                break;
            };
            if tile.state() == TileState::Loading {
                tile.abort();
                report.aborted.push(coord);
            }
            report.evicted.push(coord);
        }

        if !report.is_empty() {
            debug!(
                source = %self.key,
                evicted = report.evicted.len(),
                aborted = report.aborted.len(),
                remaining = self.tiles.len(),
                "expired tile cache"
            );
        }
        report
    }

    /// Drop every cached tile
    pub fn clear(&mut self) -> Vec<TileCoord> {
        let coords = self.tiles.keys().copied().collect();
        self.tiles.clear();
        coords
    }

    /// Cached coordinates, most recently used first
    pub fn cached_coords(&self) -> impl Iterator<Item = &TileCoord> {
        self.tiles.keys()
    }
}

/// All tile sources of a map, keyed by [`SourceKey`]
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<SourceKey, TileSource>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: TileSource) -> SourceKey {
        let key = source.key();
        self.sources.insert(key, source);
        key
    }

    pub fn remove(&mut self, key: &SourceKey) -> Option<TileSource> {
        self.sources.remove(key)
    }

    pub fn get(&self, key: &SourceKey) -> Option<&TileSource> {
        self.sources.get(key)
    }

    pub fn get_mut(&mut self, key: &SourceKey) -> Option<&mut TileSource> {
        self.sources.get_mut(key)
    }

    pub fn contains(&self, key: &SourceKey) -> bool {
        self.sources.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceKey, &TileSource)> {
        self.sources.iter()
    }

    /// Apply pending completions of every source
    pub fn poll_completions(&mut self) -> Vec<TileStateChange> {
        self.sources
            .values_mut()
            .flat_map(|source| source.poll_completions())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use crate::loader::{ChannelLoader, FnLoader, LoadError, PendingLoad};
    use crate::tile::TileImage;

    fn grid() -> TileGrid {
        TileGrid::for_extent(Extent::new(0.0, 0.0, 1024.0, 1024.0), 5, 256).unwrap()
    }

    fn local() -> Projection {
        Projection::new("LOCAL", Extent::new(0.0, 0.0, 1024.0, 1024.0), false)
    }

    fn image() -> TileImage {
        TileImage::solid(1, 1, [9, 9, 9, 255])
    }

    fn instant_source() -> TileSource {
        TileSource::new(grid(), local(), Box::new(FnLoader::new(|_: &LoadRequest| Ok(Some(image())))))
    }

    fn deferred_source() -> (TileSource, Receiver<PendingLoad>) {
        let (loader, pending) = ChannelLoader::new();
        (TileSource::new(grid(), local(), Box::new(loader)), pending)
    }

    #[test]
    fn test_get_tile_creates_and_caches() {
        let mut source = instant_source();
        let projection = local();
        assert_eq!(source.get_tile(2, 1, 1, 1.0, &projection).state(), TileState::Idle);
        assert_eq!(source.len(), 1);
        source.get_tile(2, 1, 1, 1.0, &projection);
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_out_of_grid_tile_is_empty() {
        let mut source = instant_source();
        let tile = source.get_tile(2, 9, 0, 1.0, &local());
        assert_eq!(tile.state(), TileState::Empty);
        assert!(!tile.load());
    }

    #[test]
    fn test_load_completes_on_poll() {
        let mut source = instant_source();
        let coord = source.get_tile(2, 1, 1, 1.0, &local()).coord();

        assert!(source.load_tile(&coord));
        assert!(!source.load_tile(&coord));
        assert_eq!(source.tile_state(&coord), Some(TileState::Loading));

        let changes = source.poll_completions();
        assert_eq!(
            changes,
            vec![TileStateChange {
                key: TileKey::new(source.key(), coord),
                state: TileState::Loaded,
            }]
        );
        assert_eq!(source.tile_state(&coord), Some(TileState::Loaded));
    }

    #[test]
    fn test_failed_and_empty_loads() {
        let mut source = TileSource::new(
            grid(),
            local(),
            Box::new(FnLoader::new(|request: &LoadRequest| {
                if request.coord.x == 0 {
                    Err(LoadError::Failed("404".to_string()))
                } else {
                    Ok(None)
                }
            })),
        );
        let projection = local();
        source.get_tile(1, 0, 0, 1.0, &projection);
        source.get_tile(1, 1, 0, 1.0, &projection);
        source.load_tile(&TileCoord::new(1, 0, 0));
        source.load_tile(&TileCoord::new(1, 1, 0));
        source.poll_completions();

        assert_eq!(source.tile_state(&TileCoord::new(1, 0, 0)), Some(TileState::Error));
        assert_eq!(source.tile_state(&TileCoord::new(1, 1, 0)), Some(TileState::Empty));
    }

    #[test]
    fn test_completion_for_evicted_tile_is_ignored() {
        let (mut source, pending) = deferred_source();
        let coord = source.get_tile(2, 0, 0, 1.0, &local()).coord();
        source.load_tile(&coord);
        source.clear();

        let load = pending.try_recv().unwrap();
        load.completion.complete(Ok(Some(image())));
        assert!(source.poll_completions().is_empty());
        assert!(source.is_empty());
    }

    #[test]
    fn test_refresh_keeps_previous_as_interim() {
        let mut source = instant_source();
        let projection = local();
        let coord = source.get_tile(2, 1, 1, 1.0, &projection).coord();
        source.load_tile(&coord);
        source.poll_completions();

        source.refresh();
        let tile = source.get_tile(2, 1, 1, 1.0, &projection);
        assert_eq!(tile.state(), TileState::Idle);
        assert_eq!(tile.revision(), 1);
        assert_eq!(tile.interim_tile().revision(), 0);
        assert_eq!(tile.interim_tile().state(), TileState::Loaded);
    }

    #[test]
    fn test_set_key_only_refreshes_on_change() {
        let mut source = instant_source();
        source.set_key("a");
        assert_eq!(source.revision(), 1);
        source.set_key("a");
        assert_eq!(source.revision(), 1);
        source.set_key("b");
        assert_eq!(source.revision(), 2);
        assert_eq!(source.content_key(), "b");
    }

    #[test]
    fn test_old_revision_completion_updates_interim() {
        let (mut source, pending) = deferred_source();
        let projection = local();
        let coord = source.get_tile(2, 1, 1, 1.0, &projection).coord();
        source.load_tile(&coord);
        source.refresh();
        source.get_tile(2, 1, 1, 1.0, &projection);

        let load = pending.try_recv().unwrap();
        assert_eq!(load.request.revision, 0);
        load.completion.complete(Ok(Some(image())));
        assert_eq!(source.poll_completions().len(), 1);

        let tile = source.peek_tile(&coord).unwrap();
        assert_eq!(tile.state(), TileState::Idle);
        assert_eq!(tile.interim_tile().state(), TileState::Loaded);
    }

    #[test]
    fn test_wrapped_coordinates_share_cache_entry() {
        let projection = Projection::web_mercator();
        let mut source = TileSource::new(
            TileGrid::for_projection(&projection, 4).unwrap(),
            projection.clone(),
            Box::new(FnLoader::new(|_: &LoadRequest| Ok(None))),
        );
        let wrapped = source.get_tile(2, -1, 1, 1.0, &projection).coord();
        assert_eq!(wrapped, TileCoord::new(2, 3, 1));
        source.get_tile(2, 3, 1, 1.0, &projection);
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_for_each_loaded_tile_reports_coverage() {
        let mut source = instant_source();
        let projection = local();
        for x in 0..2 {
            let coord = source.get_tile(3, x, 0, 1.0, &projection).coord();
            source.load_tile(&coord);
        }
        source.poll_completions();

        let mut seen = Vec::new();
        let covered = source.for_each_loaded_tile(3, &TileRange::new(0, 1, 0, 0), &projection, |coord, _| {
            seen.push(coord);
            true
        });
        assert!(covered);
        assert_eq!(seen.len(), 2);

        let covered = source.for_each_loaded_tile(3, &TileRange::new(0, 2, 0, 0), &projection, |_, _| true);
        assert!(!covered);

        let covered = source.for_each_loaded_tile(3, &TileRange::new(0, 1, 0, 0), &projection, |coord, _| coord.x == 0);
        assert!(!covered);
    }

    #[test]
    fn test_expire_cache_stops_at_used_tile() {
        let mut source = instant_source().with_cache_size(2);
        let projection = local();
        for x in 0..4 {
            let coord = source.get_tile(2, x, 0, 1.0, &projection).coord();
            source.load_tile(&coord);
        }
        source.poll_completions();
        assert!(source.can_expire_cache());

        // Tile x=1 is second oldest and in the used range
        let used = HashMap::from([(2u8, TileRange::new(1, 1, 0, 0))]);
        let report = source.expire_cache(Some(&used), None);
        assert_eq!(report.evicted, vec![TileCoord::new(2, 0, 0)]);
        assert_eq!(source.len(), 3);
    }

    #[test]
    fn test_expire_cache_protects_wanted_and_aborts_loading() {
        let (source, _pending) = deferred_source();
        let mut source = source.with_cache_size(1);
        let projection = local();
        let first = source.get_tile(2, 0, 0, 1.0, &projection).coord();
        source.load_tile(&first);
        let second = source.get_tile(2, 1, 0, 1.0, &projection).coord();
        let third = source.get_tile(2, 2, 0, 1.0, &projection).coord();

        let wanted = HashSet::from([second, third]);
        let report = source.expire_cache(None, Some(&wanted));
        assert_eq!(report.evicted, vec![first]);
        assert_eq!(report.aborted, vec![first]);
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_expire_cache_aborts_unwanted_tiles_below_high_water_mark() {
        let (mut source, pending) = deferred_source();
        let projection = local();
        let dropped = source.get_tile(2, 0, 0, 1.0, &projection).coord();
        let kept = source.get_tile(2, 1, 0, 1.0, &projection).coord();
        let idle = source.get_tile(2, 2, 0, 1.0, &projection).coord();
        source.load_tile(&dropped);
        source.load_tile(&kept);
        assert!(!source.can_expire_cache());

        let wanted = HashSet::from([kept]);
        let report = source.expire_cache(None, Some(&wanted));
        assert_eq!(report.evicted, vec![idle, dropped]);
        assert_eq!(report.aborted, vec![dropped]);
        assert_eq!(source.tile_state(&dropped), None);
        assert_eq!(source.tile_state(&kept), Some(TileState::Loading));

        // The late completion of the dropped load changes nothing
        for load in pending.try_iter() {
            load.completion.complete(Ok(Some(image())));
        }
        let changes = source.poll_completions();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key.coord, kept);
        assert_eq!(source.tile_state(&dropped), None);

        // Requested again, it starts over
        assert_eq!(source.get_tile(2, 0, 0, 1.0, &projection).state(), TileState::Idle);
        assert!(source.load_tile(&dropped));
    }

    #[test]
    fn test_expire_cache_removes_aborted_tiles_unless_wanted() {
        let mut source = instant_source();
        let projection = local();
        let stale = source.get_tile(2, 0, 0, 1.0, &projection).coord();
        let wanted = source.get_tile(2, 1, 0, 1.0, &projection).coord();
        source.peek_tile_mut(&stale).unwrap().abort();
        source.peek_tile_mut(&wanted).unwrap().abort();

        // Being drawn does not keep an aborted tile
        let used = HashMap::from([(2u8, TileRange::new(0, 1, 0, 0))]);
        let report = source.expire_cache(Some(&used), Some(&HashSet::from([wanted])));
        assert_eq!(report.evicted, vec![stale]);
        assert!(report.aborted.is_empty());
        assert_eq!(source.tile_state(&wanted), Some(TileState::Abort));
    }

    #[test]
    fn test_get_tile_replaces_aborted_tile() {
        let mut source = instant_source();
        let projection = local();
        let coord = source.get_tile(2, 0, 0, 1.0, &projection).coord();
        source.load_tile(&coord);
        source.peek_tile_mut(&coord).unwrap().abort();

        let tile = source.get_tile(2, 0, 0, 1.0, &projection);
        assert_eq!(tile.state(), TileState::Idle);
        assert!(tile.interim().is_none());
        assert!(source.load_tile(&coord));
        source.poll_completions();
        assert_eq!(source.tile_state(&coord), Some(TileState::Loaded));
    }

    #[test]
    fn test_registry_polls_all_sources() {
        let mut registry = SourceRegistry::new();
        let projection = local();
        let first = registry.add(instant_source());
        let second = registry.add(instant_source());
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);

        for key in [first, second] {
            let source = registry.get_mut(&key).unwrap();
            let coord = source.get_tile(0, 0, 0, 1.0, &projection).coord();
            source.load_tile(&coord);
        }

        let changes = registry.poll_completions();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|change| change.state == TileState::Loaded));
        assert!(registry.remove(&first).is_some());
        assert!(!registry.contains(&first));
    }
}
