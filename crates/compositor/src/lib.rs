//! Tessera Compositor Library
//!
//! Turns a view and its layers into tile draws. Layer renderers pick the
//! tiles of each frame, upload them through the GPU texture cache and hand
//! the draws to a [`Surface`]. [`RenderLoop`] ties sources, the tile queue,
//! the texture cache and the renderers together for a host.
//!
//! # Example
//!
//! ```
//! use tessera_cache::HeadlessBackend;
//! use tessera_compositor::{DrawList, RenderConfig, RenderLoop};
//! use tessera_render::{Coordinate, Extent, FnLoader, LoadRequest, Projection, TileGrid, TileImage, TileSource};
//! use tessera_scheduler::{LayerId, LayerState, TileLayerOptions, ViewState};
//!
//! let projection = Projection::new("LOCAL", Extent::new(0.0, 0.0, 1024.0, 1024.0), false);
//! let grid = TileGrid::for_extent(*projection.extent(), 3, 256).unwrap();
//! let loader = FnLoader::new(|_: &LoadRequest| Ok(Some(TileImage::solid(256, 256, [0, 128, 0, 255]))));
//!
//! let mut render_loop = RenderLoop::new(HeadlessBackend::new(), RenderConfig::default());
//! let source = render_loop.add_source(TileSource::new(grid, projection.clone(), Box::new(loader)));
//! let layers = vec![LayerState::tile(LayerId::new(), TileLayerOptions::new(source))];
//! let view = ViewState::new(Coordinate::new(512.0, 512.0), 4.0, projection);
//!
//! let mut surface = DrawList::new();
//! let first = render_loop.render_frame(view.clone(), (256, 256), 1.0, layers.clone(), &mut surface);
//! assert_eq!(first.loads_started, 1);
//!
//! render_loop.poll();
//! let second = render_loop.render_frame(view, (256, 256), 1.0, layers, &mut surface);
//! assert_eq!(second.tiles_drawn, 1);
//! ```

pub mod compositor;
pub mod config;
pub mod layer;
pub mod render_loop;
pub mod surface;
pub mod tile_layer;

pub use compositor::{ComposeSummary, FrameCompositor};
pub use config::{LoadingConfig, RenderConfig};
pub use layer::{FeatureHit, LayerRenderer, RenderContext, RendererRegistry};
pub use render_loop::{FrameSummary, RenderLoop};
pub use surface::{DrawCommand, DrawList, Rect, Surface, TileDraw};
pub use tile_layer::{TextureKey, TileLayerRenderer};
