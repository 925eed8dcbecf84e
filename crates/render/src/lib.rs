//! Tessera Render Library
//!
//! Tile pyramid addressing, the tile state machine, the asynchronous load
//! seam and tile sources with their decoded tile caches.

pub mod extent;
pub mod grid;
pub mod loader;
pub mod source;
pub mod tile;

pub use extent::{Coordinate, Extent, Projection};
pub use grid::{GridError, TileCoord, TileGrid, TileGridOptions, TileRange, ZDirection, DEFAULT_TILE_SIZE};
pub use loader::{
    ChannelLoader, FetchFn, FnLoader, LoadCompletion, LoadError, LoadOutcome, LoadRequest, PendingLoad,
    TileCompletion, TileLoader, WorkerPoolConfig, WorkerPoolLoader,
};
pub use source::{
    ExpireReport, SourceKey, SourceRegistry, TileKey, TileSource, TileStateChange, UsedRanges,
};
pub use tile::{ConsumerId, Tile, TileImage, TileState, DEFAULT_TRANSITION};
