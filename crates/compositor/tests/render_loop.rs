//! Multi-frame scenarios driven through the public render loop API

use std::sync::mpsc::Receiver;
use std::time::Duration;

use tessera_cache::{CacheConfig, HeadlessBackend};
use tessera_compositor::{DrawCommand, DrawList, LoadingConfig, RenderConfig, RenderLoop};
use tessera_render::{
    ChannelLoader, Coordinate, Extent, FnLoader, LoadError, LoadRequest, PendingLoad, Projection, SourceKey,
    TileCoord, TileGrid, TileImage, TileSource, TileState,
};
use tessera_scheduler::{LayerId, LayerState, TileLayerOptions, ViewState};

const SIZE: f64 = 1024.0;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn local() -> Projection {
    Projection::new("LOCAL", Extent::new(0.0, 0.0, SIZE, SIZE), false)
}

/// Levels 0..=3 of 256 pixel tiles over a 1024 map unit square
fn grid() -> TileGrid {
    TileGrid::for_extent(Extent::new(0.0, 0.0, SIZE, SIZE), 3, 256).unwrap()
}

fn config(tile_cache_size: usize, loading: LoadingConfig) -> RenderConfig {
    RenderConfig::default()
        .with_cache(CacheConfig::new(tile_cache_size, 256))
        .with_loading(loading.with_transition(Duration::ZERO))
}

fn solid_source() -> TileSource {
    let loader = FnLoader::new(|_: &LoadRequest| Ok(Some(TileImage::solid(4, 4, [10, 20, 30, 255]))));
    TileSource::new(grid(), local(), Box::new(loader))
}

fn view(x: f64, y: f64, resolution: f64) -> ViewState {
    ViewState::new(Coordinate::new(x, y), resolution, local())
}

fn tile_layer(source: SourceKey) -> LayerState {
    LayerState::tile(LayerId::new(), TileLayerOptions::new(source))
}

#[test]
fn test_view_settles_after_loads() {
    init_tracing();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, LoadingConfig::default()));
    let source = render_loop.add_source(solid_source());
    let layers = vec![tile_layer(source)];
    let mut surface = DrawList::new();

    let first = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers.clone(), &mut surface);
    assert_eq!(first.layers_composed, 0);
    assert_eq!(first.loads_started, 4);
    assert!(surface.tiles().next().is_none());

    assert_eq!(render_loop.poll(), 4);
    surface.clear();
    let second = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers, &mut surface);
    assert_eq!(second.layers_composed, 1);
    assert_eq!(second.tiles_drawn, 4);
    assert_eq!(second.tiles_queued, 0);
    assert_eq!(second.tiles_loading, 0);
    assert!(!second.needs_render);

    let stats = render_loop.queue_stats();
    assert_eq!(stats.loads_started, 4);
    assert_eq!(stats.loads_finished, 4);
}

#[test]
fn test_zooming_in_draws_parent_until_children_load() {
    init_tracing();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, LoadingConfig::default()));
    let source = render_loop.add_source(solid_source());
    let layers = vec![tile_layer(source)];

    render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers.clone(), &mut DrawList::new());
    render_loop.poll();

    // z1 is requested; only the z0 tile is loaded
    let mut surface = DrawList::new();
    let zoomed = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers.clone(), &mut surface);
    assert_eq!(zoomed.tiles_drawn, 1);
    assert!(matches!(
        surface.tiles().next(),
        Some(DrawCommand::Tile { coord, .. }) if *coord == TileCoord::new(0, 0, 0)
    ));
    assert_eq!(zoomed.loads_started, 4);

    render_loop.poll();
    let mut surface = DrawList::new();
    let settled = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers, &mut surface);
    assert_eq!(settled.tiles_drawn, 4);
    assert!(surface
        .tiles()
        .all(|command| matches!(command, DrawCommand::Tile { coord, .. } if coord.z == 1)));
}

#[test]
fn test_panning_drops_stale_queue_entries() {
    init_tracing();
    let loading = LoadingConfig::default().with_limits(16, 1);
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, loading));
    let source = render_loop.add_source(solid_source());
    let layers = vec![tile_layer(source)];

    let first = render_loop.render_frame(view(256.0, 256.0, 1.0), (512, 512), 1.0, layers.clone(), &mut DrawList::new());
    assert_eq!(first.loads_started, 1);
    assert_eq!(first.tiles_queued, 3);

    let panned = render_loop.render_frame(view(768.0, 768.0, 1.0), (512, 512), 1.0, layers, &mut DrawList::new());
    assert_eq!(panned.dropped, 3);
    assert_eq!(panned.loads_started, 1);
    assert_eq!(panned.tiles_queued, 3);
}

#[test]
fn test_panning_away_cancels_unfinished_tiles() {
    init_tracing();
    let (loader, pending): (ChannelLoader, Receiver<PendingLoad>) = ChannelLoader::new();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, LoadingConfig::default()));
    let source = render_loop.add_source(TileSource::new(grid(), local(), Box::new(loader)));
    let layers = vec![tile_layer(source)];

    let first = render_loop.render_frame(view(256.0, 256.0, 1.0), (512, 512), 1.0, layers.clone(), &mut DrawList::new());
    assert_eq!(first.tiles_loading, 4);
    let stale: Vec<PendingLoad> = pending.try_iter().collect();
    assert_eq!(stale.len(), 4);

    // Far below the cache size, the unfinished tiles still go
    let panned = render_loop.render_frame(view(768.0, 768.0, 1.0), (512, 512), 1.0, layers, &mut DrawList::new());
    assert_eq!(panned.tiles_evicted, 4);
    assert_eq!(panned.loads_started, 4);
    assert_eq!(panned.tiles_loading, 4);
    let tiles = render_loop.sources().get(&source).unwrap();
    for load in &stale {
        assert_eq!(tiles.tile_state(&load.request.coord), None, "{} still cached", load.request.coord);
    }

    // Late results for the abandoned tiles change nothing
    let stale_coords: Vec<TileCoord> = stale.iter().map(|load| load.request.coord).collect();
    for load in stale {
        load.completion.complete(Ok(Some(TileImage::solid(4, 4, [0, 0, 0, 255]))));
    }
    assert_eq!(render_loop.poll(), 0);
    assert_eq!(render_loop.tile_queue().tiles_loading(), 4);
    let tiles = render_loop.sources().get(&source).unwrap();
    assert!(stale_coords.iter().all(|coord| tiles.tile_state(coord).is_none()));

    for load in pending.try_iter() {
        load.completion.complete(Ok(Some(TileImage::solid(4, 4, [0, 0, 0, 255]))));
    }
    assert_eq!(render_loop.poll(), 4);
    assert_eq!(render_loop.tile_queue().tiles_loading(), 0);
    assert_eq!(render_loop.queue_stats().loads_started, 8);
}

#[test]
fn test_sweep_evicts_unwanted_tiles_and_their_textures() {
    init_tracing();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(4, LoadingConfig::default()));
    let source = render_loop.add_source(solid_source());
    let layers = vec![tile_layer(source)];

    render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers.clone(), &mut DrawList::new());
    render_loop.poll();
    let drawn = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers.clone(), &mut DrawList::new());
    assert_eq!(drawn.tiles_drawn, 4);
    assert_eq!(render_loop.backend().live_textures(), 4);

    // Zoom into the top-left corner: four z3 tiles join the four cached z1 tiles
    let zoomed = render_loop.render_frame(view(128.0, 896.0, 0.5), (256, 256), 1.0, layers, &mut DrawList::new());
    assert!(zoomed.tiles_evicted > 0);
    assert_eq!(zoomed.textures_released, zoomed.tiles_evicted);
    assert_eq!(render_loop.backend().live_textures(), 4 - zoomed.tiles_evicted);

    // The z1 parent covering the view is wanted and survives
    let tiles = render_loop.sources().get(&source).unwrap();
    assert_eq!(tiles.tile_state(&TileCoord::new(1, 0, 0)), Some(TileState::Loaded));
    assert_eq!(tiles.tile_state(&TileCoord::new(3, 0, 0)), Some(TileState::Loading));
}

#[test]
fn test_failed_loads_release_slots() {
    init_tracing();
    let (loader, pending): (ChannelLoader, Receiver<PendingLoad>) = ChannelLoader::new();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, LoadingConfig::default()));
    let source = render_loop.add_source(TileSource::new(grid(), local(), Box::new(loader)));
    let layers = vec![tile_layer(source)];

    let first = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers.clone(), &mut DrawList::new());
    assert_eq!(first.tiles_loading, 4);

    for load in pending.try_iter() {
        load.completion.complete(Err(LoadError::Failed("503".into())));
    }
    assert_eq!(render_loop.poll(), 4);
    assert_eq!(render_loop.tile_queue().tiles_loading(), 0);

    // Error tiles are not retried and nothing is drawable
    let second = render_loop.render_frame(view(512.0, 512.0, 2.0), (512, 512), 1.0, layers, &mut DrawList::new());
    assert_eq!(second.tiles_drawn, 0);
    assert_eq!(second.loads_started, 0);
    assert!(pending.try_recv().is_err());
}

#[test]
fn test_layers_compose_in_z_order() {
    init_tracing();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, LoadingConfig::default()));
    let base = render_loop.add_source(solid_source());
    let overlay = render_loop.add_source(solid_source());
    let top = tile_layer(overlay).with_z_index(10).with_opacity(0.5);
    let bottom = tile_layer(base);
    let layers = vec![top.clone(), bottom.clone()];

    render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers.clone(), &mut DrawList::new());
    render_loop.poll();

    let mut surface = DrawList::new();
    let summary = render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers, &mut surface);
    assert_eq!(summary.layers_composed, 2);

    let order: Vec<LayerId> = surface
        .commands()
        .iter()
        .filter_map(|command| match command {
            DrawCommand::BeginLayer { layer, .. } => Some(*layer),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![bottom.id, top.id]);
    assert!(surface.tiles().any(|command| matches!(
        command,
        DrawCommand::Tile { layer, alpha, .. } if *layer == top.id && *alpha == 0.5
    )));
}

#[test]
fn test_context_restore_reuploads_textures() {
    init_tracing();
    let mut render_loop = RenderLoop::new(HeadlessBackend::new(), config(64, LoadingConfig::default()));
    let source = render_loop.add_source(solid_source());
    let layers = vec![tile_layer(source)];

    render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers.clone(), &mut DrawList::new());
    render_loop.poll();
    render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers.clone(), &mut DrawList::new());
    assert_eq!(render_loop.backend().uploads(), 1);

    render_loop.backend_mut().lose_context();
    let lost = render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers.clone(), &mut DrawList::new());
    assert_eq!(lost.draws_skipped, 1);
    assert_eq!(render_loop.texture_stats().texture_count, 0);

    render_loop.backend_mut().restore_context();
    let restored = render_loop.render_frame(view(512.0, 512.0, 4.0), (256, 256), 1.0, layers, &mut DrawList::new());
    assert_eq!(restored.tiles_drawn, 1);
    assert_eq!(render_loop.backend().uploads(), 2);
}
