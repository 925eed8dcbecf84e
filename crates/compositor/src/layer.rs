//! Layer renderers
//!
//! Each layer of a frame is drawn by a [`LayerRenderer`]. Renderers are
//! created on demand through a [`RendererRegistry`], which tries its
//! registered predicates in order and uses the factory of the first match.

use tessera_cache::{GpuBackend, GpuResourceCache};
use tessera_render::{Coordinate, SourceRegistry};
use tessera_scheduler::{FrameState, LayerId, LayerKind, LayerState};

use crate::surface::Surface;
use crate::tile_layer::{TextureKey, TileLayerRenderer};

/// Shared resources a frame's renderers work with
pub struct RenderContext<'a> {
    pub sources: &'a mut SourceRegistry,
    pub textures: &'a mut GpuResourceCache<TextureKey>,
    pub backend: &'a mut dyn GpuBackend,

    /// Tiles handed to the surface this frame
    pub tiles_drawn: usize,

    /// Draws skipped because their texture was unavailable
    pub draws_skipped: usize,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        sources: &'a mut SourceRegistry,
        textures: &'a mut GpuResourceCache<TextureKey>,
        backend: &'a mut dyn GpuBackend,
    ) -> Self {
        Self {
            sources,
            textures,
            backend,
            tiles_drawn: 0,
            draws_skipped: 0,
        }
    }
}

/// Something found under a map coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureHit {
    pub layer: LayerId,
    pub coordinate: Coordinate,
}

/// Draws one layer
pub trait LayerRenderer {
    /// Work out what to draw; returns `false` when there is nothing to compose
    fn prepare_frame(&mut self, frame: &mut FrameState<'_>, layer: &LayerState, ctx: &mut RenderContext<'_>) -> bool;

    /// Draw what the last `prepare_frame` selected
    fn compose_frame(
        &mut self,
        frame: &mut FrameState<'_>,
        layer: &LayerState,
        ctx: &mut RenderContext<'_>,
        surface: &mut dyn Surface,
    );

    /// Hit detection at a map coordinate
    fn for_each_feature_at_coordinate(
        &self,
        _coordinate: &Coordinate,
        _frame: &FrameState<'_>,
        _layer: &LayerState,
    ) -> Option<FeatureHit> {
        None
    }
}

type Predicate = Box<dyn Fn(&LayerState) -> bool>;
type Factory = Box<dyn Fn(&LayerState) -> Box<dyn LayerRenderer>>;

/// Ordered renderer factories
pub struct RendererRegistry {
    entries: Vec<(Predicate, Factory)>,
}

impl RendererRegistry {
    /// Registry without any renderer
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registry with the built-in tile layer renderer
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(
            |layer| matches!(layer.kind, LayerKind::Tile(_)),
            |_| Box::new(TileLayerRenderer::new()),
        );
        registry
    }

    /// Add a factory; earlier registrations take precedence
    pub fn register<P, F>(&mut self, handles: P, create: F)
    where
        P: Fn(&LayerState) -> bool + 'static,
        F: Fn(&LayerState) -> Box<dyn LayerRenderer> + 'static,
    {
        self.entries.push((Box::new(handles), Box::new(create)));
    }

    /// Create the renderer of the first factory handling `layer`
    pub fn create(&self, layer: &LayerState) -> Option<Box<dyn LayerRenderer>> {
        self.entries
            .iter()
            .find(|(handles, _)| handles(layer))
            .map(|(_, create)| create(layer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}
