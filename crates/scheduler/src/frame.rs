//! Per-frame state
//!
//! A [`FrameState`] is assembled before each render, threaded through every
//! layer renderer, and discarded once its post-render tasks have run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use tessera_render::{Coordinate, Extent, Projection, SourceKey, TileCoord, TileKey, UsedRanges};

use crate::tile_queue::TileQueue;

/// Tiles each source needs for the current frame
pub type WantedTiles = HashMap<SourceKey, HashSet<TileCoord>>;

/// Tile ranges each source drew from in the current frame
pub type UsedTiles = HashMap<SourceKey, UsedRanges>;

/// Unique identifier for a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    /// Create a new unique layer ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of a tiled layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileLayerOptions {
    pub source: SourceKey,

    /// Number of coarser levels loaded ahead of the current one
    pub preload: u8,

    /// Keep looking for interim tiles when a tile fails, instead of drawing nothing
    pub use_interim_tiles_on_error: bool,
}

impl TileLayerOptions {
    pub fn new(source: SourceKey) -> Self {
        Self {
            source,
            preload: 0,
            use_interim_tiles_on_error: true,
        }
    }
}

/// What a layer draws
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Tile(TileLayerOptions),

    /// Layer handled by a renderer registered for this tag
    Custom(&'static str),
}

/// Rendering state of one layer for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct LayerState {
    pub id: LayerId,
    pub kind: LayerKind,
    pub z_index: i32,
    pub opacity: f32,
    pub visible: bool,

    /// Lowest view resolution (inclusive) the layer is drawn at
    pub min_resolution: f64,

    /// Highest view resolution (exclusive) the layer is drawn at
    pub max_resolution: f64,

    /// Restricts drawing to this extent
    pub extent: Option<Extent>,
}

impl LayerState {
    pub fn new(id: LayerId, kind: LayerKind) -> Self {
        Self {
            id,
            kind,
            z_index: 0,
            opacity: 1.0,
            visible: true,
            min_resolution: 0.0,
            max_resolution: f64::INFINITY,
            extent: None,
        }
    }

    /// Layer state for a tiled layer
    pub fn tile(id: LayerId, options: TileLayerOptions) -> Self {
        Self::new(id, LayerKind::Tile(options))
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    pub fn with_resolution_range(mut self, min_resolution: f64, max_resolution: f64) -> Self {
        self.min_resolution = min_resolution;
        self.max_resolution = max_resolution;
        self
    }

    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn tile_options(&self) -> Option<&TileLayerOptions> {
        match &self.kind {
            LayerKind::Tile(options) => Some(options),
            LayerKind::Custom(_) => None,
        }
    }

    /// Whether the layer draws at `resolution`
    pub fn visible_at_resolution(&self, resolution: f64) -> bool {
        self.visible && self.min_resolution <= resolution && resolution < self.max_resolution
    }
}

/// View parameters of a frame
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub center: Coordinate,
    pub resolution: f64,

    /// Rotation in radians
    pub rotation: f64,
    pub projection: Projection,
}

impl ViewState {
    pub fn new(center: Coordinate, resolution: f64, projection: Projection) -> Self {
        Self {
            center,
            resolution,
            rotation: 0.0,
            projection,
        }
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    /// Extent covered by a viewport of `size` pixels, including rotation
    pub fn extent_for_size(&self, size: (u32, u32)) -> Extent {
        if self.rotation == 0.0 {
            return Extent::for_view(self.center, self.resolution, size);
        }
        let half_width = size.0 as f64 * self.resolution / 2.0;
        let half_height = size.1 as f64 * self.resolution / 2.0;
        let (sin, cos) = self.rotation.sin_cos();
        let dx = (half_width * cos).abs() + (half_height * sin).abs();
        let dy = (half_width * sin).abs() + (half_height * cos).abs();
        Extent::new(
            self.center.x - dx,
            self.center.y - dy,
            self.center.x + dx,
            self.center.y + dy,
        )
    }
}

/// Work deferred until every layer of a frame has been composed
pub enum PostRenderTask {
    /// Sweep the decoded tile cache of a source
    ExpireTileCache(SourceKey),

    /// Sweep the GPU texture cache
    ExpireTextureCache,

    Callback(Box<dyn FnOnce(&FrameState<'_>)>),
}

impl fmt::Debug for PostRenderTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostRenderTask::ExpireTileCache(source) => f.debug_tuple("ExpireTileCache").field(source).finish(),
            PostRenderTask::ExpireTextureCache => f.write_str("ExpireTextureCache"),
            PostRenderTask::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Everything a frame's renderers read and record
pub struct FrameState<'a> {
    pub index: u64,
    pub time: Instant,

    /// Viewport size in pixels
    pub size: (u32, u32),
    pub pixel_ratio: f32,
    pub view_state: ViewState,

    /// Map extent visible in the viewport
    pub extent: Extent,

    /// Layers in document order
    pub layer_states: Vec<LayerState>,
    pub wanted_tiles: WantedTiles,
    pub used_tiles: UsedTiles,
    pub tile_queue: &'a mut TileQueue,

    /// Run in order after the frame is composed
    pub post_render_tasks: Vec<PostRenderTask>,

    /// Set when another frame should follow (e.g. a fade is running)
    pub animate: bool,
}

impl<'a> FrameState<'a> {
    pub fn new(
        index: u64,
        view_state: ViewState,
        size: (u32, u32),
        pixel_ratio: f32,
        tile_queue: &'a mut TileQueue,
    ) -> Self {
        let extent = view_state.extent_for_size(size);
        Self {
            index,
            time: Instant::now(),
            size,
            pixel_ratio,
            view_state,
            extent,
            layer_states: Vec::new(),
            wanted_tiles: WantedTiles::new(),
            used_tiles: UsedTiles::new(),
            tile_queue,
            post_render_tasks: Vec::new(),
            animate: false,
        }
    }

    pub fn with_time(mut self, time: Instant) -> Self {
        self.time = time;
        self
    }

    pub fn with_layers(mut self, layer_states: Vec<LayerState>) -> Self {
        self.layer_states = layer_states;
        self
    }

    /// Point the load priorities are measured from
    pub fn focus(&self) -> Coordinate {
        self.view_state.center
    }

    pub fn mark_wanted(&mut self, key: TileKey) {
        self.wanted_tiles.entry(key.source).or_default().insert(key.coord);
    }

    pub fn is_wanted(&self, key: &TileKey) -> bool {
        self.wanted_tiles
            .get(&key.source)
            .is_some_and(|coords| coords.contains(&key.coord))
    }

    pub fn push_post_render_task(&mut self, task: PostRenderTask) {
        self.post_render_tasks.push(task);
    }

    /// Remove the queued post-render tasks, oldest first
    pub fn take_post_render_tasks(&mut self) -> Vec<PostRenderTask> {
        std::mem::take(&mut self.post_render_tasks)
    }
}
