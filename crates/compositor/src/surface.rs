//! Drawing surface
//!
//! Renderers hand finished tile draws to a [`Surface`]. The surface owns the
//! actual graphics calls; [`DrawList`] is a recording surface that keeps the
//! commands of a frame for headless hosts and tests.

use tessera_cache::GpuTexture;
use tessera_render::{SourceKey, TileCoord};
use tessera_scheduler::{LayerId, LayerState};

/// Rectangle in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// One textured tile quad
#[derive(Debug)]
pub struct TileDraw<'a> {
    pub layer: LayerId,
    pub source: SourceKey,

    /// Cache coordinate of the drawn tile
    pub coord: TileCoord,
    pub revision: u64,

    /// Destination in viewport pixels
    pub dest: Rect,

    /// Tile fade multiplied by layer opacity
    pub alpha: f32,
    pub texture: &'a GpuTexture,
}

/// Target of a frame's draws
pub trait Surface {
    /// Called before the draws of each composed layer, in draw order
    fn begin_layer(&mut self, _layer: &LayerState) {}

    fn draw_tile(&mut self, draw: TileDraw<'_>);
}

/// Recorded draw operation
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    BeginLayer {
        layer: LayerId,
        opacity: f32,
    },
    Tile {
        layer: LayerId,
        source: SourceKey,
        coord: TileCoord,
        revision: u64,
        dest: Rect,
        alpha: f32,
        /// Texture size in pixels
        texture_size: (u32, u32),
    },
}

/// Surface that records draw commands
#[derive(Debug, Default)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Tile draws only, in draw order
    pub fn tiles(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands
            .iter()
            .filter(|command| matches!(command, DrawCommand::Tile { .. }))
    }

    /// Number of tile draws
    pub fn tile_count(&self) -> usize {
        self.tiles().count()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Take the recorded commands, leaving the list empty
    pub fn take(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl Surface for DrawList {
    fn begin_layer(&mut self, layer: &LayerState) {
        self.commands.push(DrawCommand::BeginLayer {
            layer: layer.id,
            opacity: layer.opacity,
        });
    }

    fn draw_tile(&mut self, draw: TileDraw<'_>) {
        self.commands.push(DrawCommand::Tile {
            layer: draw.layer,
            source: draw.source,
            coord: draw.coord,
            revision: draw.revision,
            dest: draw.dest,
            alpha: draw.alpha,
            texture_size: (draw.texture.width, draw.texture.height),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_scheduler::{LayerKind, LayerState};

    #[test]
    fn test_draw_list_records_in_order() {
        let layer = LayerState::new(LayerId::new(), LayerKind::Custom("test")).with_opacity(0.5);
        let texture = GpuTexture::new((), 256, 256, 256 * 256 * 4);
        let mut list = DrawList::new();

        list.begin_layer(&layer);
        list.draw_tile(TileDraw {
            layer: layer.id,
            source: SourceKey::new(),
            coord: TileCoord::new(1, 0, 1),
            revision: 0,
            dest: Rect::new(0.0, 0.0, 256.0, 256.0),
            alpha: 0.5,
            texture: &texture,
        });

        assert_eq!(list.commands().len(), 2);
        assert_eq!(list.tile_count(), 1);
        assert!(matches!(
            list.commands()[0],
            DrawCommand::BeginLayer { opacity, .. } if opacity == 0.5
        ));
        assert!(matches!(
            list.commands()[1],
            DrawCommand::Tile { texture_size: (256, 256), .. }
        ));

        let taken = list.take();
        assert_eq!(taken.len(), 2);
        assert!(list.is_empty());
    }

    #[test]
    fn test_rect_edges() {
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(rect.right(), 40.0);
        assert_eq!(rect.bottom(), 60.0);
    }
}
