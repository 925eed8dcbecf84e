//! Tiled layer renderer
//!
//! Picks the level matching the view resolution, draws whatever of it is
//! loaded, fills the gaps with loaded children or ancestors, and asks the
//! pyramid scheduler for the tiles still missing.

use tessera_cache::TextureUpload;
use tessera_render::{ConsumerId, Extent, SourceKey, Tile, TileCoord, TileRange, TileState};
use tessera_scheduler::{
    create_loaded_tile_finder, find_interim_tiles, manage_tile_pyramid, schedule_expire_cache, update_used_tiles,
    DrawableTile, FrameState, LayerState, TileLayerOptions, TilesByZ,
};
use tracing::{debug, trace, warn};

use crate::layer::{LayerRenderer, RenderContext};
use crate::surface::{Rect, Surface, TileDraw};

/// Key of a tile's texture in the GPU cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub source: SourceKey,
    pub coord: TileCoord,
    pub revision: u64,
}

fn is_drawable(state: TileState, options: &TileLayerOptions) -> bool {
    match state {
        TileState::Loaded | TileState::Empty => true,
        TileState::Error => !options.use_interim_tiles_on_error,
        _ => false,
    }
}

/// Renderer for [`tessera_scheduler::LayerKind::Tile`] layers
pub struct TileLayerRenderer {
    consumer: ConsumerId,
    tiles_to_draw: TilesByZ,

    /// Level chosen by the last prepared frame
    render_z: Option<u8>,
}

impl TileLayerRenderer {
    pub fn new() -> Self {
        Self {
            consumer: ConsumerId::new(),
            tiles_to_draw: TilesByZ::new(),
            render_z: None,
        }
    }

    /// Consumer identity used for tile fades
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Level chosen by the last prepared frame
    pub fn render_z(&self) -> Option<u8> {
        self.render_z
    }

    /// Tiles selected by the last prepared frame
    pub fn tiles_to_draw(&self) -> &TilesByZ {
        &self.tiles_to_draw
    }

    /// Record the tile of `requested` if it can be drawn
    ///
    /// Returns whether the tile is fully faded in, so no fallback is needed.
    fn select_tile(&mut self, tile: &mut Tile, requested: TileCoord, options: &TileLayerOptions, frame: &FrameState<'_>) -> bool {
        if tile.state() == TileState::Error && !options.use_interim_tiles_on_error {
            // Drawn as nothing so it stops blocking the level
            tile.set_state(TileState::Loaded);
        }

        let (revision, state) = if is_drawable(tile.state(), options) {
            (tile.revision(), tile.state())
        } else {
            let interim = tile.interim_tile();
            (interim.revision(), interim.state())
        };
        if !is_drawable(state, options) {
            return false;
        }
        if state != TileState::Loaded {
            return true;
        }

        let drawable = DrawableTile {
            coord: tile.coord(),
            revision,
        };
        self.tiles_to_draw
            .entry(requested.z)
            .or_default()
            .insert(requested, drawable);
        tile.revision_mut(revision)
            .is_some_and(|drawn| drawn.alpha(self.consumer, frame.time) >= 1.0)
    }

    /// Mark the ranges of every drawn level as used
    fn record_used_tiles(&self, frame: &mut FrameState<'_>, source: SourceKey) {
        for (z, tiles) in &self.tiles_to_draw {
            let mut coords = tiles.values().map(|drawable| drawable.coord);
            let Some(first) = coords.next() else {
                continue;
            };
            let mut range = TileRange::single(first.x, first.y);
            for coord in coords {
                range.extend(&TileRange::single(coord.x, coord.y));
            }
            update_used_tiles(&mut frame.used_tiles, source, *z, &range);
        }
    }
}

impl Default for TileLayerRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination of `extent` in viewport pixels
fn pixel_rect(frame: &FrameState<'_>, extent: &Extent) -> Rect {
    let scale = frame.pixel_ratio as f64 / frame.view_state.resolution;
    Rect::new(
        ((extent.min_x - frame.extent.min_x) * scale) as f32,
        ((frame.extent.max_y - extent.max_y) * scale) as f32,
        (extent.width() * scale) as f32,
        (extent.height() * scale) as f32,
    )
}

impl LayerRenderer for TileLayerRenderer {
    fn prepare_frame(&mut self, frame: &mut FrameState<'_>, layer: &LayerState, ctx: &mut RenderContext<'_>) -> bool {
        self.tiles_to_draw.clear();
        self.render_z = None;

        let Some(options) = layer.tile_options().copied() else {
            return false;
        };
        let Some(source) = ctx.sources.get_mut(&options.source) else {
            warn!(layer = ?layer.id, source = %options.source, "tile layer source is not registered");
            return false;
        };

        let mut extent = frame.extent;
        if let Some(layer_extent) = &layer.extent {
            match extent.intersection(layer_extent) {
                Some(clipped) => extent = clipped,
                None => return false,
            }
        }

        let grid = source.shared_grid();
        let z = grid.z_for_resolution(frame.view_state.resolution, source.z_direction());
        let range = grid.tile_range_for_extent_and_z(&extent, z);
        let projection = frame.view_state.projection.clone();
        let pixel_ratio = frame.pixel_ratio;
        self.render_z = Some(z);

        let mut needs_fallback = Vec::new();
        for (x, y) in range.iter() {
            let requested = TileCoord::new(z, x, y);
            let tile = source.get_tile(z, x, y, pixel_ratio, &projection);
            if !self.select_tile(tile, requested, &options, frame) {
                needs_fallback.push(requested);
            }
        }

        let fallbacks = needs_fallback.len();
        {
            let mut finder = create_loaded_tile_finder(source, &projection, &mut self.tiles_to_draw);
            for requested in &needs_fallback {
                if !find_interim_tiles(&grid, requested, &mut finder) {
                    trace!(coord = %requested, "no interim tiles");
                }
            }
        }

        update_used_tiles(&mut frame.used_tiles, options.source, z, &range);
        self.record_used_tiles(frame, options.source);
        manage_tile_pyramid(frame, source, pixel_ratio, &extent, z, options.preload, None);
        schedule_expire_cache(frame, source);

        debug!(
            layer = ?layer.id,
            z,
            tiles = range.len(),
            fallbacks,
            levels = self.tiles_to_draw.len(),
            "prepared tile layer"
        );
        !self.tiles_to_draw.is_empty()
    }

    fn compose_frame(
        &mut self,
        frame: &mut FrameState<'_>,
        layer: &LayerState,
        ctx: &mut RenderContext<'_>,
        surface: &mut dyn Surface,
    ) {
        let Some(options) = layer.tile_options().copied() else {
            return;
        };
        let Some(source) = ctx.sources.get_mut(&options.source) else {
            return;
        };
        let grid = source.shared_grid();

        surface.begin_layer(layer);
        // BTreeMap order draws coarser levels first
        for tiles in self.tiles_to_draw.values() {
            for (requested, drawable) in tiles {
                let Some(tile) = source
                    .peek_tile_mut(&drawable.coord)
                    .and_then(|tile| tile.revision_mut(drawable.revision))
                else {
                    continue;
                };
                // Promoted error tiles have no image
                let Some(image) = tile.image().cloned() else {
                    continue;
                };

                let alpha = tile.alpha(self.consumer, frame.time);
                if alpha < 1.0 {
                    frame.animate = true;
                } else {
                    tile.end_transition(self.consumer);
                }

                let key = TextureKey {
                    source: options.source,
                    coord: drawable.coord,
                    revision: drawable.revision,
                };
                let upload = TextureUpload {
                    width: image.width,
                    height: image.height,
                    pixels: &image.pixels,
                };
                match ctx.textures.get_or_upload(&key, &mut *ctx.backend, upload) {
                    Ok(texture) => {
                        surface.draw_tile(TileDraw {
                            layer: layer.id,
                            source: options.source,
                            coord: drawable.coord,
                            revision: drawable.revision,
                            dest: pixel_rect(frame, &grid.tile_coord_extent(requested)),
                            alpha: alpha * layer.opacity,
                            texture,
                        });
                        ctx.tiles_drawn += 1;
                    }
                    Err(err) => {
                        warn!(coord = %drawable.coord, error = %err, "skipping tile draw");
                        ctx.draws_skipped += 1;
                    }
                }
            }
        }
    }
}
