// Frame compositor - draws a frame's layers in z-order and runs its post-render work
//
// For every frame the compositor:
// - Sorts the layer states by z-index
// - Prepares and composes each layer visible at the view resolution through
//   its renderer, creating renderers on first use
// - Drops renderers of layers that left the frame
// - Runs the post-render tasks: tile cache sweeps, texture cache sweep, callbacks

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tessera_render::{Coordinate, TileCoord};
use tessera_scheduler::{expire_source_cache, FrameState, LayerId, LayerState, PostRenderTask};
use tracing::{debug, trace, warn};

use crate::layer::{FeatureHit, LayerRenderer, RenderContext, RendererRegistry};
use crate::surface::Surface;

/// What one [`FrameCompositor::render_frame`] call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeSummary {
    /// Layers whose renderer prepared something to draw
    pub layers_composed: usize,

    /// Visible layers without a renderer
    pub layers_unhandled: usize,

    /// Tiles evicted from source caches by post-render sweeps
    pub tiles_evicted: usize,

    /// Textures released by post-render work
    pub textures_released: usize,
}

/// Layer renderers of a map and the per-frame compose pass
pub struct FrameCompositor {
    registry: RendererRegistry,
    renderers: HashMap<LayerId, Box<dyn LayerRenderer>>,
}

impl FrameCompositor {
    /// Create a compositor with the built-in renderers
    pub fn new() -> Self {
        Self::with_registry(RendererRegistry::new())
    }

    pub fn with_registry(registry: RendererRegistry) -> Self {
        Self {
            registry,
            renderers: HashMap::new(),
        }
    }

    pub fn registry_mut(&mut self) -> &mut RendererRegistry {
        &mut self.registry
    }

    /// Number of live layer renderers
    pub fn renderer_count(&self) -> usize {
        self.renderers.len()
    }

    pub fn has_renderer(&self, layer: &LayerId) -> bool {
        self.renderers.contains_key(layer)
    }

    /// Draw a frame and run its post-render tasks
    pub fn render_frame(
        &mut self,
        frame: &mut FrameState<'_>,
        ctx: &mut RenderContext<'_>,
        surface: &mut dyn Surface,
    ) -> ComposeSummary {
        let mut summary = ComposeSummary::default();
        ctx.textures.begin_frame(frame.index);

        let resolution = frame.view_state.resolution;
        for layer in sorted_layers(&frame.layer_states) {
            if !layer.visible_at_resolution(resolution) {
                continue;
            }
            let renderer = match self.renderers.entry(layer.id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match self.registry.create(&layer) {
                    Some(renderer) => entry.insert(renderer),
                    None => {
                        warn!(layer = ?layer.id, kind = ?layer.kind, "no renderer for layer");
                        summary.layers_unhandled += 1;
                        continue;
                    }
                },
            };
            if renderer.prepare_frame(frame, &layer, ctx) {
                renderer.compose_frame(frame, &layer, ctx, surface);
                summary.layers_composed += 1;
            }
        }

        let present: HashSet<LayerId> = frame.layer_states.iter().map(|layer| layer.id).collect();
        self.renderers.retain(|id, _| present.contains(id));

        if ctx.textures.needs_expiry() {
            frame.push_post_render_task(PostRenderTask::ExpireTextureCache);
        }
        self.run_post_render_tasks(frame, ctx, &mut summary);

        debug!(
            frame = frame.index,
            layers = summary.layers_composed,
            drawn = ctx.tiles_drawn,
            skipped = ctx.draws_skipped,
            evicted = summary.tiles_evicted,
            "composed frame"
        );
        summary
    }

    fn run_post_render_tasks(
        &self,
        frame: &mut FrameState<'_>,
        ctx: &mut RenderContext<'_>,
        summary: &mut ComposeSummary,
    ) {
        // Tasks queued while running (e.g. by callbacks) wait for the next frame
        for task in frame.take_post_render_tasks() {
            trace!(?task, "running post-render task");
            match task {
                PostRenderTask::ExpireTileCache(key) => {
                    let Some(source) = ctx.sources.get_mut(&key) else {
                        continue;
                    };
                    let report = expire_source_cache(frame, source);
                    if report.is_empty() {
                        continue;
                    }
                    summary.tiles_evicted += report.evicted.len();
                    let evicted: HashSet<TileCoord> = report.evicted.into_iter().collect();
                    summary.textures_released += ctx.textures.remove_where(
                        |texture| texture.source == key && evicted.contains(&texture.coord),
                        &mut *ctx.backend,
                    );
                }
                PostRenderTask::ExpireTextureCache => {
                    summary.textures_released += ctx.textures.expire(frame.index, &mut *ctx.backend);
                }
                PostRenderTask::Callback(callback) => callback(&*frame),
            }
        }
    }

    /// Hit detection through the visible layers, topmost first
    ///
    /// Stops when `callback` returns `true` and returns that.
    pub fn for_each_feature_at_coordinate<F>(&self, frame: &FrameState<'_>, coordinate: &Coordinate, mut callback: F) -> bool
    where
        F: FnMut(&FeatureHit) -> bool,
    {
        let resolution = frame.view_state.resolution;
        for layer in sorted_layers(&frame.layer_states).iter().rev() {
            if !layer.visible_at_resolution(resolution) {
                continue;
            }
            let Some(renderer) = self.renderers.get(&layer.id) else {
                continue;
            };
            if let Some(hit) = renderer.for_each_feature_at_coordinate(coordinate, frame, layer) {
                if callback(&hit) {
                    return true;
                }
            }
        }
        false
    }
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Layer states by z-index, document order among equal z-indexes
fn sorted_layers(layers: &[LayerState]) -> Vec<LayerState> {
    let mut sorted = layers.to_vec();
    sorted.sort_by_key(|layer| layer.z_index);
    sorted
}
