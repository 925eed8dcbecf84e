//! Tessera Scheduler Library
//!
//! Per-frame tile scheduling: the reprioritizable load queue, the frame state
//! renderers share, and the pyramid helpers that decide which tiles a view
//! needs.
//!
//! # Example
//!
//! ```
//! use tessera_render::{Coordinate, Extent, FnLoader, LoadRequest, Projection, SourceRegistry, TileGrid, TileSource};
//! use tessera_scheduler::{manage_tile_pyramid, FrameState, TileQueue, ViewState};
//!
//! let projection = Projection::new("LOCAL", Extent::new(0.0, 0.0, 1024.0, 1024.0), false);
//! let grid = TileGrid::for_extent(*projection.extent(), 4, 256).unwrap();
//! let loader = FnLoader::new(|_: &LoadRequest| Ok(None));
//! let mut sources = SourceRegistry::new();
//! let key = sources.add(TileSource::new(grid, projection.clone(), Box::new(loader)));
//!
//! let mut queue = TileQueue::new();
//! let view = ViewState::new(Coordinate::new(512.0, 512.0), 4.0, projection);
//! let mut frame = FrameState::new(0, view, (256, 256), 1.0, &mut queue);
//! let extent = frame.extent;
//!
//! let source = sources.get_mut(&key).unwrap();
//! manage_tile_pyramid(&mut frame, source, 1.0, &extent, 0, 0, None);
//! assert_eq!(frame.tile_queue.len(), 1);
//!
//! frame.tile_queue.load_more_tiles(16, 8, &mut sources);
//! ```

mod frame;
mod priority;
mod pyramid;
mod tile_queue;

// Re-export public API
pub use frame::{
    FrameState, LayerId, LayerKind, LayerState, PostRenderTask, TileLayerOptions, UsedTiles, ViewState, WantedTiles,
};
pub use priority::{tile_priority, PriorityQueue, DROP, RESOLUTION_WEIGHT};
pub use pyramid::{
    create_loaded_tile_finder, expire_source_cache, find_interim_tiles, manage_tile_pyramid, schedule_expire_cache,
    update_used_tiles, DrawableTile, PyramidSummary, TilesByZ,
};
pub use tile_queue::{queued_tile_priority, LoadSummary, QueuedTile, TileQueue, TileQueueStats};
