//! Tile pyramid management
//!
//! Helpers tiled layer renderers call while preparing a frame: deciding which
//! tiles of which levels a view needs, finding already loaded tiles to draw
//! in place of missing ones, and recording what the frame used so the end of
//! frame cache sweep keeps it.

use std::collections::BTreeMap;

use tessera_render::{
    Extent, ExpireReport, Projection, SourceKey, Tile, TileCoord, TileGrid, TileKey, TileRange, TileSource,
    TileState,
};
use tracing::{debug, trace};

use crate::frame::{FrameState, PostRenderTask, UsedTiles};
use crate::tile_queue::QueuedTile;

/// A loaded tile picked for drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableTile {
    /// Cache coordinate in the source
    pub coord: TileCoord,

    /// Revision of the tile, which may be an interim link
    pub revision: u64,
}

/// Tiles to draw per level, keyed by requested coordinate
pub type TilesByZ = BTreeMap<u8, BTreeMap<TileCoord, DrawableTile>>;

/// Tiles touched by one [`manage_tile_pyramid`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PyramidSummary {
    /// Tiles fetched or created for loading
    pub tiles: usize,

    /// Tiles newly queued for loading
    pub queued: usize,

    /// Tiles only touched in the cache
    pub touched: usize,
}

/// Request the tiles of `extent` from min zoom up to `current_z`
///
/// Levels within `preload` of `current_z` get their tiles created, marked
/// wanted and queued when idle; `on_each_tile` sees each of them. Coarser
/// levels are only touched in the cache so they are not evicted.
pub fn manage_tile_pyramid(
    frame: &mut FrameState<'_>,
    source: &mut TileSource,
    pixel_ratio: f32,
    extent: &Extent,
    current_z: u8,
    preload: u8,
    mut on_each_tile: Option<&mut dyn FnMut(&Tile)>,
) -> PyramidSummary {
    let source_key = source.key();
    let grid = source.shared_grid();
    let projection = frame.view_state.projection.clone();
    let focus = frame.focus();
    let mut summary = PyramidSummary::default();

    for z in grid.min_zoom()..=current_z {
        let range = grid.tile_range_for_extent_and_z(extent, z);
        let resolution = grid.resolution(z);
        let preloaded = current_z - z <= preload;

        for (x, y) in range.iter() {
            if !preloaded {
                source.use_tile(z, x, y, &projection);
                let coord = source.cache_coord(TileCoord::new(z, x, y), &projection);
                frame.mark_wanted(TileKey::new(source_key, coord));
                summary.touched += 1;
                continue;
            }

            let center = grid.tile_coord_center(&TileCoord::new(z, x, y));
            let tile = source.get_tile(z, x, y, pixel_ratio, &projection);
            let key = TileKey::new(source_key, tile.coord());
            frame.mark_wanted(key);
            summary.tiles += 1;

            if tile.state() == TileState::Idle && !frame.tile_queue.is_key_queued(&key) {
                let queued = QueuedTile {
                    key,
                    center,
                    resolution,
                };
                if frame.tile_queue.enqueue(queued, &frame.wanted_tiles, &focus) {
                    summary.queued += 1;
                }
            }
            if let Some(callback) = on_each_tile.as_mut() {
                callback(&*tile);
            }
        }
    }

    debug!(
        source = %source_key,
        current_z,
        tiles = summary.tiles,
        queued = summary.queued,
        touched = summary.touched,
        "managed tile pyramid"
    );
    summary
}

/// Finder recording the loaded tiles of a range into `out`
///
/// The returned closure answers whether every tile of `(z, range)` is loaded.
pub fn create_loaded_tile_finder<'s>(
    source: &'s mut TileSource,
    projection: &'s Projection,
    out: &'s mut TilesByZ,
) -> impl FnMut(u8, &TileRange) -> bool + 's {
    move |z, range| {
        source.for_each_loaded_tile(z, range, projection, |coord, tile| {
            let drawable = DrawableTile {
                coord: tile.coord(),
                revision: tile.revision(),
            };
            out.entry(z).or_default().insert(coord, drawable);
            true
        })
    }
}

/// Look for loaded tiles covering `coord`
///
/// Children are tried first; when they do not fully cover the tile, ancestors
/// are walked from the closest level down until one covers it.
pub fn find_interim_tiles<F>(grid: &TileGrid, coord: &TileCoord, finder: &mut F) -> bool
where
    F: FnMut(u8, &TileRange) -> bool,
{
    if let Some(children) = grid.tile_coord_child_tile_range(coord) {
        if finder(coord.z + 1, &children) {
            trace!(coord = %coord, "covered by children");
            return true;
        }
    }
    grid.for_each_tile_coord_parent_tile_range(coord, |z, range| finder(z, range))
}

/// Grow the range of level `z` the frame used from `source`
pub fn update_used_tiles(used: &mut UsedTiles, source: SourceKey, z: u8, range: &TileRange) {
    used.entry(source)
        .or_default()
        .entry(z)
        .and_modify(|used| used.extend(range))
        .or_insert(*range);
}

/// Queue a sweep of the source's tile cache once the frame is composed
///
/// Every frame gets one, so tiles that stopped being wanted are aborted even
/// when the cache is below its high-water mark. Returns whether a sweep was
/// scheduled; at most one is queued per source.
pub fn schedule_expire_cache(frame: &mut FrameState<'_>, source: &TileSource) -> bool {
    let key = source.key();
    let already_scheduled = frame
        .post_render_tasks
        .iter()
        .any(|task| matches!(task, PostRenderTask::ExpireTileCache(scheduled) if *scheduled == key));
    if !already_scheduled {
        frame.push_post_render_task(PostRenderTask::ExpireTileCache(key));
    }
    !already_scheduled
}

/// Sweep the source's tile cache, keeping what the frame used or wanted
///
/// Unfinished tiles the frame no longer wants are aborted and release their
/// load slots in the frame's queue.
pub fn expire_source_cache(frame: &mut FrameState<'_>, source: &mut TileSource) -> ExpireReport {
    let key = source.key();
    let report = source.expire_cache(frame.used_tiles.get(&key), frame.wanted_tiles.get(&key));
    frame.tile_queue.handle_aborted(key, &report.aborted);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;
    use tessera_render::{ChannelLoader, Coordinate, PendingLoad, TileImage};

    use crate::frame::ViewState;
    use crate::tile_queue::TileQueue;

    const SIZE: f64 = 1024.0;

    fn local() -> Projection {
        Projection::new("LOCAL", Extent::new(0.0, 0.0, SIZE, SIZE), false)
    }

    /// Levels 0..=5 with resolutions 4, 2, 1, 0.5, 0.25, 0.125
    fn source() -> (TileSource, Receiver<PendingLoad>) {
        let grid = TileGrid::for_extent(Extent::new(0.0, 0.0, SIZE, SIZE), 5, 256).unwrap();
        let (loader, pending) = ChannelLoader::new();
        (TileSource::new(grid, local(), Box::new(loader)), pending)
    }

    fn frame(queue: &mut TileQueue) -> FrameState<'_> {
        let view = ViewState::new(Coordinate::new(SIZE / 2.0, SIZE / 2.0), 1.0, local());
        FrameState::new(0, view, (1024, 1024), 1.0, queue)
    }

    /// Load `coord` and complete it with an image
    fn load(source: &mut TileSource, pending: &Receiver<PendingLoad>, coord: TileCoord) {
        source.get_tile(coord.z, coord.x, coord.y, 1.0, &local());
        assert!(source.load_tile(&coord));
        let load = pending.try_recv().unwrap();
        load.completion.complete(Ok(Some(TileImage::solid(1, 1, [0, 0, 0, 255]))));
        source.poll_completions();
    }

    #[test]
    fn test_preload_levels_are_queued() {
        let (mut source, _pending) = source();
        let mut queue = TileQueue::new();
        let mut frame = frame(&mut queue);
        let extent = Extent::new(0.0, 0.0, SIZE, SIZE);

        let mut seen = 0;
        let mut count = |_: &Tile| seen += 1;
        let summary = manage_tile_pyramid(&mut frame, &mut source, 1.0, &extent, 3, 1, Some(&mut count));

        // 4x4 tiles at z2 and 8x8 at z3
        assert_eq!(summary.tiles, 80);
        assert_eq!(summary.queued, 80);
        assert_eq!(summary.touched, 1 + 4);
        assert_eq!(frame.tile_queue.len(), 80);
        assert!(frame.tile_queue.is_key_queued(&TileKey::new(source.key(), TileCoord::new(2, 3, 3))));
        assert!(!frame.tile_queue.is_key_queued(&TileKey::new(source.key(), TileCoord::new(1, 0, 0))));
        drop(frame);
        assert_eq!(seen, 80);

        // Levels 0 and 1 were only touched, never created
        assert_eq!(source.len(), 80);
        assert!(source.peek_tile(&TileCoord::new(1, 0, 0)).is_none());
    }

    #[test]
    fn test_visited_tiles_are_wanted() {
        let (mut source, _pending) = source();
        let mut queue = TileQueue::new();
        let mut frame = frame(&mut queue);
        let extent = Extent::new(0.0, 768.0, 256.0, SIZE);

        manage_tile_pyramid(&mut frame, &mut source, 1.0, &extent, 2, 0, None);
        for coord in [TileCoord::new(0, 0, 0), TileCoord::new(1, 0, 0), TileCoord::new(2, 0, 0)] {
            assert!(frame.is_wanted(&TileKey::new(source.key(), coord)), "{coord} not wanted");
        }
        assert_eq!(frame.tile_queue.len(), 1);
    }

    #[test]
    fn test_loaded_and_loading_tiles_are_not_queued() {
        let (mut source, pending) = source();
        load(&mut source, &pending, TileCoord::new(0, 0, 0));
        let mut queue = TileQueue::new();
        let mut frame = frame(&mut queue);

        let summary = manage_tile_pyramid(&mut frame, &mut source, 1.0, &Extent::new(0.0, 0.0, SIZE, SIZE), 0, 0, None);
        assert_eq!(summary.tiles, 1);
        assert_eq!(summary.queued, 0);
    }

    #[test]
    fn test_children_preferred_over_ancestors() {
        let (mut source, pending) = source();
        let projection = local();
        load(&mut source, &pending, TileCoord::new(3, 1, 1));
        for coord in TileRange::new(6, 7, 6, 7).coords(5) {
            load(&mut source, &pending, coord);
        }
        let coord = TileCoord::new(4, 3, 3);
        source.get_tile(4, 3, 3, 1.0, &projection);
        source.load_tile(&coord);
        assert_eq!(source.tile_state(&coord), Some(TileState::Loading));

        let grid = source.shared_grid();
        let mut tiles = TilesByZ::new();
        let mut finder = create_loaded_tile_finder(&mut source, &projection, &mut tiles);
        assert!(find_interim_tiles(&grid, &coord, &mut finder));
        drop(finder);

        assert_eq!(tiles.keys().copied().collect::<Vec<_>>(), vec![5]);
        assert_eq!(tiles[&5].len(), 4);
    }

    #[test]
    fn test_ancestor_used_when_children_missing() {
        let (mut source, pending) = source();
        let projection = local();
        load(&mut source, &pending, TileCoord::new(2, 0, 0));
        load(&mut source, &pending, TileCoord::new(5, 6, 6));

        let grid = source.shared_grid();
        let mut tiles = TilesByZ::new();
        let mut finder = create_loaded_tile_finder(&mut source, &projection, &mut tiles);
        assert!(find_interim_tiles(&grid, &TileCoord::new(4, 3, 3), &mut finder));
        drop(finder);

        // The partial child is recorded too, then the z2 ancestor covers the tile
        assert_eq!(tiles[&5].len(), 1);
        assert_eq!(tiles[&2].len(), 1);
        assert!(!tiles.contains_key(&3));
    }

    #[test]
    fn test_no_interim_tiles() {
        let (mut source, _pending) = source();
        let projection = local();
        let grid = source.shared_grid();
        let mut tiles = TilesByZ::new();
        let mut finder = create_loaded_tile_finder(&mut source, &projection, &mut tiles);
        assert!(!find_interim_tiles(&grid, &TileCoord::new(2, 1, 1), &mut finder));
        drop(finder);
        assert!(tiles.is_empty());
    }

    #[test]
    fn test_update_used_tiles_extends_range() {
        let mut used = UsedTiles::new();
        let (source, _pending) = source();
        update_used_tiles(&mut used, source.key(), 3, &TileRange::new(0, 1, 0, 1));
        update_used_tiles(&mut used, source.key(), 3, &TileRange::new(4, 4, 2, 2));
        update_used_tiles(&mut used, source.key(), 2, &TileRange::single(1, 1));

        let ranges = &used[&source.key()];
        assert_eq!(ranges[&3], TileRange::new(0, 4, 0, 2));
        assert_eq!(ranges[&2], TileRange::single(1, 1));
    }

    #[test]
    fn test_schedule_expire_cache_once() {
        let (source, _pending) = source();
        let mut queue = TileQueue::new();
        let mut frame = frame(&mut queue);

        // Scheduled below the high-water mark too
        assert!(!source.can_expire_cache());
        assert!(schedule_expire_cache(&mut frame, &source));
        assert!(!schedule_expire_cache(&mut frame, &source));
        assert_eq!(frame.post_render_tasks.len(), 1);
    }

    #[test]
    fn test_wanted_tiles_survive_frame_sweep() {
        let (source, _pending) = source();
        let mut source = source.with_cache_size(4);
        let projection = local();
        // Stale tiles from an earlier view
        for x in 0..8 {
            source.get_tile(3, x, 7, 1.0, &projection);
        }

        let mut queue = TileQueue::new();
        let mut frame = frame(&mut queue);
        let extent = Extent::new(0.0, 0.0, SIZE, SIZE);
        manage_tile_pyramid(&mut frame, &mut source, 1.0, &extent, 2, 0, None);
        assert!(schedule_expire_cache(&mut frame, &source));

        let report = expire_source_cache(&mut frame, &mut source);
        assert_eq!(report.evicted.len(), 8);
        for coord in TileRange::new(0, 3, 0, 3).coords(2) {
            assert!(source.peek_tile(&coord).is_some(), "{coord} evicted");
        }
        assert_eq!(source.len(), 16);
    }

    #[test]
    fn test_frame_sweep_releases_aborted_loads() {
        let (source, _pending) = source();
        let mut source = source.with_cache_size(1);
        let projection = local();
        let mut queue = TileQueue::new();
        let mut frame = frame(&mut queue);

        manage_tile_pyramid(&mut frame, &mut source, 1.0, &Extent::new(0.0, 0.0, 256.0, 256.0), 2, 0, None);
        let mut registry = tessera_render::SourceRegistry::new();
        let source_key = registry.add(source);
        frame.tile_queue.load_more_tiles(16, 8, &mut registry);
        assert_eq!(frame.tile_queue.tiles_loading(), 1);

        // Next frame looks elsewhere; the in-flight tile is no longer wanted
        let source = registry.get_mut(&source_key).unwrap();
        source.get_tile(2, 3, 3, 1.0, &projection);
        source.get_tile(2, 3, 2, 1.0, &projection);
        frame.wanted_tiles.clear();
        let report = expire_source_cache(&mut frame, source);
        assert_eq!(report.aborted, vec![TileCoord::new(2, 0, 3)]);
        assert_eq!(frame.tile_queue.tiles_loading(), 0);
    }

    #[test]
    fn test_moving_away_aborts_unfinished_tiles() {
        let (source, pending) = source();
        let mut registry = tessera_render::SourceRegistry::new();
        let source_key = registry.add(source);
        let mut queue = TileQueue::new();

        // Bottom-left quarter at z2, well below the cache's high-water mark
        let mut first = frame(&mut queue);
        let before = Extent::new(0.0, 0.0, 512.0, 512.0);
        let source = registry.get_mut(&source_key).unwrap();
        manage_tile_pyramid(&mut first, source, 1.0, &before, 2, 0, None);
        schedule_expire_cache(&mut first, source);
        first.tile_queue.load_more_tiles(16, 16, &mut registry);
        assert_eq!(first.tile_queue.tiles_loading(), 4);
        let started: Vec<TileCoord> = pending.try_iter().map(|load| load.request.coord).collect();
        assert_eq!(started.len(), 4);

        // Top-right quarter next
        let mut second = frame(&mut queue);
        let after = Extent::new(512.0, 512.0, 1024.0, 1024.0);
        let source = registry.get_mut(&source_key).unwrap();
        manage_tile_pyramid(&mut second, source, 1.0, &after, 2, 0, None);
        assert!(!source.can_expire_cache());
        assert!(schedule_expire_cache(&mut second, source));
        let report = expire_source_cache(&mut second, source);

        let mut aborted = report.aborted.clone();
        aborted.sort();
        let mut expected = started.clone();
        expected.sort();
        assert_eq!(aborted, expected);
        assert_eq!(second.tile_queue.tiles_loading(), 0);
        for coord in &started {
            assert_eq!(source.tile_state(coord), None, "{coord} still cached");
        }
        for coord in TileRange::new(2, 3, 0, 1).coords(2) {
            assert_eq!(source.tile_state(&coord), Some(TileState::Idle));
        }
    }
}
