//! Render loop
//!
//! Owns everything a map needs between frames: the tile sources, the tile
//! queue, the texture cache with its backend and the layer renderers. A host
//! calls [`RenderLoop::poll`] whenever loads may have finished and
//! [`RenderLoop::render_frame`] once per frame.

use tessera_cache::{GpuBackend, GpuCacheStats, GpuResourceCache};
use tessera_render::{SourceKey, SourceRegistry, TileSource};
use tessera_scheduler::{FrameState, LayerState, TileQueue, TileQueueStats, ViewState};
use tracing::{debug, info, trace};

use crate::compositor::FrameCompositor;
use crate::config::RenderConfig;
use crate::layer::RenderContext;
use crate::surface::Surface;
use crate::tile_layer::TextureKey;

/// What one rendered frame did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub index: u64,
    pub layers_composed: usize,
    pub tiles_drawn: usize,
    pub draws_skipped: usize,
    pub tiles_evicted: usize,
    pub textures_released: usize,

    /// Tiles waiting in the queue after this frame's loads started
    pub tiles_queued: usize,
    pub tiles_loading: usize,
    pub loads_started: usize,

    /// Queued tiles dropped as no longer wanted
    pub dropped: usize,

    /// Tiles are still fading in
    pub animate: bool,

    /// Another frame should follow without waiting for loads
    pub needs_render: bool,
}

/// Frame driver for one map
pub struct RenderLoop<B: GpuBackend> {
    config: RenderConfig,
    sources: SourceRegistry,
    textures: GpuResourceCache<TextureKey>,
    backend: B,
    tile_queue: TileQueue,
    compositor: FrameCompositor,
    frame_index: u64,
    interacting: bool,
}

impl<B: GpuBackend> RenderLoop<B> {
    pub fn new(backend: B, config: RenderConfig) -> Self {
        info!(
            tile_cache_size = config.cache.tile_cache_size,
            texture_cache_size = config.cache.texture_cache_size,
            max_total_loading = config.loading.max_total_loading,
            max_new_loads = config.loading.max_new_loads,
            "render loop created"
        );
        Self {
            config,
            sources: SourceRegistry::new(),
            textures: GpuResourceCache::new(config.cache.texture_cache_size),
            backend,
            tile_queue: TileQueue::new(),
            compositor: FrameCompositor::new(),
            frame_index: 0,
            interacting: false,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Register a source; it takes the configured cache size and fade duration
    pub fn add_source(&mut self, source: TileSource) -> SourceKey {
        let source = source
            .with_cache_size(self.config.cache.tile_cache_size)
            .with_transition(self.config.loading.transition());
        let key = self.sources.add(source);
        debug!(source = %key, "source added");
        key
    }

    /// Unregister a source, dropping its queued loads and textures
    pub fn remove_source(&mut self, key: &SourceKey) -> Option<TileSource> {
        let source = self.sources.remove(key)?;
        self.tile_queue.remove_source(*key);
        let released = self
            .textures
            .remove_where(|texture| texture.source == *key, &mut self.backend);
        debug!(source = %key, released, "source removed");
        Some(source)
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceRegistry {
        &mut self.sources
    }

    pub fn source_mut(&mut self, key: &SourceKey) -> Option<&mut TileSource> {
        self.sources.get_mut(key)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn compositor_mut(&mut self) -> &mut FrameCompositor {
        &mut self.compositor
    }

    pub fn texture_stats(&self) -> GpuCacheStats {
        self.textures.stats()
    }

    pub fn queue_stats(&self) -> TileQueueStats {
        self.tile_queue.stats()
    }

    pub fn tile_queue(&self) -> &TileQueue {
        &self.tile_queue
    }

    /// Index the next frame will get
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Throttle loads while the user drags or zooms
    pub fn set_interacting(&mut self, interacting: bool) {
        self.interacting = interacting;
    }

    pub fn is_interacting(&self) -> bool {
        self.interacting
    }

    /// Apply finished loads
    ///
    /// Returns the number of tiles that changed state; a non-zero count
    /// means a frame should be rendered.
    pub fn poll(&mut self) -> usize {
        let changes = self.sources.poll_completions();
        if !changes.is_empty() {
            self.tile_queue.handle_tile_changes(&changes);
            trace!(changes = changes.len(), loading = self.tile_queue.tiles_loading(), "applied tile changes");
        }
        changes.len()
    }

    /// Forget every texture; the backend's handles are already gone
    pub fn handle_context_lost(&mut self) {
        self.textures.handle_context_lost();
    }

    pub fn handle_context_restored(&mut self) {
        self.textures.handle_context_restored();
    }

    /// Release every texture to the backend
    pub fn release_textures(&mut self) {
        self.textures.clear(&mut self.backend);
    }

    fn sync_context(&mut self) {
        let lost = self.backend.is_context_lost();
        if lost && !self.textures.is_context_lost() {
            self.handle_context_lost();
        } else if !lost && self.textures.is_context_lost() {
            self.handle_context_restored();
        }
    }

    /// Draw one frame and start the loads it asks for
    pub fn render_frame(
        &mut self,
        view: ViewState,
        size: (u32, u32),
        pixel_ratio: f32,
        layers: Vec<LayerState>,
        surface: &mut dyn Surface,
    ) -> FrameSummary {
        self.sync_context();

        let index = self.frame_index;
        self.frame_index += 1;

        let mut frame = FrameState::new(index, view, size, pixel_ratio, &mut self.tile_queue).with_layers(layers);
        let mut ctx = RenderContext::new(&mut self.sources, &mut self.textures, &mut self.backend);
        let composed = self.compositor.render_frame(&mut frame, &mut ctx, surface);
        let tiles_drawn = ctx.tiles_drawn;
        let draws_skipped = ctx.draws_skipped;

        let focus = frame.focus();
        let dropped = frame.tile_queue.reprioritize(&frame.wanted_tiles, &focus);
        let (max_total_loading, max_new_loads) = self.config.loading.limits(self.interacting);
        let loads = frame
            .tile_queue
            .load_more_tiles(max_total_loading, max_new_loads, &mut self.sources);

        let summary = FrameSummary {
            index,
            layers_composed: composed.layers_composed,
            tiles_drawn,
            draws_skipped,
            tiles_evicted: composed.tiles_evicted,
            textures_released: composed.textures_released,
            tiles_queued: frame.tile_queue.len(),
            tiles_loading: frame.tile_queue.tiles_loading(),
            loads_started: loads.started,
            dropped,
            animate: frame.animate,
            needs_render: frame.animate || loads.needs_render(),
        };
        debug!(
            frame = index,
            drawn = summary.tiles_drawn,
            queued = summary.tiles_queued,
            loading = summary.tiles_loading,
            started = summary.loads_started,
            "frame rendered"
        );
        summary
    }
}
