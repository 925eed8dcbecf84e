//! Tile pyramid addressing
//!
//! A [`TileGrid`] maps between map-space extents/resolutions and the discrete
//! tile pyramid. Level `z = 0` is the coarsest; resolutions strictly decrease
//! as `z` grows. Tile `(x, y)` counts right and down from the grid origin,
//! which sits at the top-left corner of the grid extent unless overridden.

use std::fmt;

use thiserror::Error;

use crate::extent::{Coordinate, Extent, Projection};

/// Default tile size in pixels
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Decimal places kept before flooring/ceiling tile indices
const INDEX_DECIMALS: i32 = 5;

/// Errors constructing a [`TileGrid`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("tile grid needs at least one resolution")]
    EmptyResolutions,

    #[error("resolutions must strictly decrease (index {index})")]
    ResolutionsNotDecreasing { index: usize },

    #[error("resolution at index {index} is not a positive finite number")]
    InvalidResolution { index: usize },

    #[error("too many resolution levels: {0}")]
    TooManyLevels(usize),

    #[error("tile size must be non-zero")]
    ZeroTileSize,

    #[error("min zoom {min_zoom} exceeds max zoom {max_zoom}")]
    MinZoomOutOfRange { min_zoom: u8, max_zoom: u8 },

    #[error("grid extent is empty")]
    EmptyExtent,
}

/// Address of one tile in the pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(z: u8, x: i64, y: i64) -> Self {
        Self { z, x, y }
    }

    /// Unique string key `"z/x/y"`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Inclusive rectangle of tile indices at one zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl TileRange {
    pub fn new(min_x: i64, max_x: i64, min_y: i64, max_y: i64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Range holding a single tile
    pub fn single(x: i64, y: i64) -> Self {
        Self::new(x, x, y, y)
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        self.contains_xy(coord.x, coord.y)
    }

    pub fn contains_xy(&self, x: i64, y: i64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }

    pub fn contains_range(&self, other: &TileRange) -> bool {
        self.min_x <= other.min_x
            && other.max_x <= self.max_x
            && self.min_y <= other.min_y
            && other.max_y <= self.max_y
    }

    /// Grow to the union bounding range
    pub fn extend(&mut self, other: &TileRange) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn width(&self) -> i64 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> i64 {
        self.max_y - self.min_y + 1
    }

    pub fn intersects(&self, other: &TileRange) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Tile count, zero for an inverted range
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.width() * self.height()) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    /// `(x, y)` pairs, column by column
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> {
        let (min_y, max_y) = (self.min_y, self.max_y);
        (self.min_x..=self.max_x).flat_map(move |x| (min_y..=max_y).map(move |y| (x, y)))
    }

    /// Tile coordinates of the range at level `z`
    pub fn coords(&self, z: u8) -> impl Iterator<Item = TileCoord> {
        self.iter().map(move |(x, y)| TileCoord::new(z, x, y))
    }
}

/// Preferred direction when a resolution falls between two levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ZDirection {
    /// Nearest level whose resolution is at least the target
    Coarser,
    /// Closest level; exact midpoints resolve to the finer one
    #[default]
    Nearest,
    /// Nearest level whose resolution is at most the target
    Finer,
}

impl ZDirection {
    /// From the numeric convention -1 / 0 / +1
    pub fn from_sign(sign: i32) -> Self {
        match sign.signum() {
            -1 => ZDirection::Coarser,
            1 => ZDirection::Finer,
            _ => ZDirection::Nearest,
        }
    }
}

/// Options for [`TileGrid::new`]
#[derive(Debug, Clone, PartialEq)]
pub struct TileGridOptions {
    pub extent: Extent,
    /// Defaults to the top-left corner of `extent`
    pub origin: Option<Coordinate>,
    pub resolutions: Vec<f64>,
    pub tile_size: u32,
    pub min_zoom: u8,
}

impl TileGridOptions {
    pub fn new(extent: Extent, resolutions: Vec<f64>) -> Self {
        Self {
            extent,
            origin: None,
            resolutions,
            tile_size: DEFAULT_TILE_SIZE,
            min_zoom: 0,
        }
    }

    pub fn with_origin(mut self, origin: Coordinate) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_min_zoom(mut self, min_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self
    }
}

/// Resolution pyramid over an extent
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    extent: Extent,
    origin: Coordinate,
    resolutions: Vec<f64>,
    tile_size: u32,
    min_zoom: u8,
    max_zoom: u8,
    zoom_factor: Option<f64>,
    full_tile_ranges: Vec<TileRange>,
}

impl TileGrid {
    pub fn new(options: TileGridOptions) -> Result<Self, GridError> {
        let TileGridOptions {
            extent,
            origin,
            resolutions,
            tile_size,
            min_zoom,
        } = options;

        if resolutions.is_empty() {
            return Err(GridError::EmptyResolutions);
        }
        if resolutions.len() > u8::MAX as usize + 1 {
            return Err(GridError::TooManyLevels(resolutions.len()));
        }
        if tile_size == 0 {
            return Err(GridError::ZeroTileSize);
        }
        if extent.is_empty() || extent.width() == 0.0 || extent.height() == 0.0 {
            return Err(GridError::EmptyExtent);
        }
        for (index, resolution) in resolutions.iter().enumerate() {
            if !resolution.is_finite() || *resolution <= 0.0 {
                return Err(GridError::InvalidResolution { index });
            }
            if index > 0 && *resolution >= resolutions[index - 1] {
                return Err(GridError::ResolutionsNotDecreasing { index });
            }
        }

        let max_zoom = (resolutions.len() - 1) as u8;
        if min_zoom > max_zoom {
            return Err(GridError::MinZoomOutOfRange { min_zoom, max_zoom });
        }

        let zoom_factor = detect_zoom_factor(&resolutions);
        let mut grid = Self {
            origin: origin.unwrap_or_else(|| extent.top_left()),
            extent,
            resolutions,
            tile_size,
            min_zoom,
            max_zoom,
            zoom_factor,
            full_tile_ranges: Vec::new(),
        };
        grid.full_tile_ranges = (0..=max_zoom)
            .map(|z| grid.tile_range_for_extent_and_z(&extent, z))
            .collect();

        tracing::trace!(
            levels = grid.resolutions.len(),
            tile_size,
            zoom_factor = ?grid.zoom_factor,
            "created tile grid"
        );
        Ok(grid)
    }

    /// Power-of-two pyramid covering `extent` with levels `0..=max_zoom`
    pub fn for_extent(extent: Extent, max_zoom: u8, tile_size: u32) -> Result<Self, GridError> {
        if tile_size == 0 {
            return Err(GridError::ZeroTileSize);
        }
        let max_resolution =
            (extent.width() / tile_size as f64).max(extent.height() / tile_size as f64);
        let resolutions = (0..=max_zoom as i32)
            .map(|z| max_resolution / 2f64.powi(z))
            .collect();
        Self::new(TileGridOptions::new(extent, resolutions).with_tile_size(tile_size))
    }

    /// Standard XYZ grid over the projection's extent
    pub fn for_projection(projection: &Projection, max_zoom: u8) -> Result<Self, GridError> {
        Self::for_extent(*projection.extent(), max_zoom, DEFAULT_TILE_SIZE)
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn origin(&self) -> Coordinate {
        self.origin
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub fn resolutions(&self) -> &[f64] {
        &self.resolutions
    }

    /// Ratio between consecutive resolutions when it is constant
    pub fn zoom_factor(&self) -> Option<f64> {
        self.zoom_factor
    }

    /// Resolution of level `z`
    ///
    /// # Panics
    ///
    /// Panics if `z` is beyond the grid's max zoom.
    pub fn resolution(&self, z: u8) -> f64 {
        self.resolutions[z as usize]
    }

    /// Map units covered by one tile at level `z`
    pub fn tile_span(&self, z: u8) -> f64 {
        self.tile_size as f64 * self.resolution(z)
    }

    /// Level for `resolution`, clamped to `[min_zoom, max_zoom]`
    pub fn z_for_resolution(&self, resolution: f64, direction: ZDirection) -> u8 {
        let last = self.resolutions.len() - 1;
        let z = match direction {
            ZDirection::Coarser => self
                .resolutions
                .iter()
                .rposition(|candidate| *candidate >= resolution)
                .unwrap_or(0),
            ZDirection::Finer => self
                .resolutions
                .iter()
                .position(|candidate| *candidate <= resolution)
                .unwrap_or(last),
            ZDirection::Nearest => {
                let mut best = 0;
                let mut best_delta = f64::INFINITY;
                for (z, candidate) in self.resolutions.iter().enumerate() {
                    let delta = (candidate - resolution).abs();
                    // `<=` hands exact ties to the finer level
                    if delta <= best_delta {
                        best = z;
                        best_delta = delta;
                    }
                }
                best
            }
        };
        (z as u8).clamp(self.min_zoom, self.max_zoom)
    }

    /// Tile containing `coordinate` at level `z`
    pub fn tile_coord_for_coord_and_z(&self, coordinate: &Coordinate, z: u8) -> TileCoord {
        self.tile_coord_for_xy_and_z(coordinate.x, coordinate.y, z, false)
    }

    fn tile_coord_for_xy_and_z(&self, x: f64, y: f64, z: u8, reverse: bool) -> TileCoord {
        let span = self.tile_span(z);
        let tile_x = (x - self.origin.x) / span;
        let tile_y = (self.origin.y - y) / span;
        if reverse {
            TileCoord::new(
                z,
                round_decimals(tile_x).ceil() as i64 - 1,
                round_decimals(tile_y).ceil() as i64 - 1,
            )
        } else {
            TileCoord::new(
                z,
                round_decimals(tile_x).floor() as i64,
                round_decimals(tile_y).floor() as i64,
            )
        }
    }

    /// Inclusive range of tiles covering `extent` at level `z`
    pub fn tile_range_for_extent_and_z(&self, extent: &Extent, z: u8) -> TileRange {
        let top_left = self.tile_coord_for_xy_and_z(extent.min_x, extent.max_y, z, false);
        let bottom_right = self.tile_coord_for_xy_and_z(extent.max_x, extent.min_y, z, true);
        TileRange::new(top_left.x, bottom_right.x, top_left.y, bottom_right.y)
    }

    /// Every tile of level `z` inside the grid extent
    pub fn full_tile_range(&self, z: u8) -> Option<&TileRange> {
        self.full_tile_ranges.get(z as usize)
    }

    /// Whether `coord` is a valid tile of this grid
    pub fn within_extent_and_z(&self, coord: &TileCoord) -> bool {
        if coord.z < self.min_zoom || coord.z > self.max_zoom {
            return false;
        }
        self.full_tile_range(coord.z)
            .is_some_and(|range| range.contains(coord))
    }

    pub fn tile_coord_extent(&self, coord: &TileCoord) -> Extent {
        let span = self.tile_span(coord.z);
        let min_x = self.origin.x + coord.x as f64 * span;
        let max_y = self.origin.y - coord.y as f64 * span;
        Extent::new(min_x, max_y - span, min_x + span, max_y)
    }

    pub fn tile_coord_center(&self, coord: &TileCoord) -> Coordinate {
        let span = self.tile_span(coord.z);
        Coordinate::new(
            self.origin.x + (coord.x as f64 + 0.5) * span,
            self.origin.y - (coord.y as f64 + 0.5) * span,
        )
    }

    pub fn tile_range_extent(&self, z: u8, range: &TileRange) -> Extent {
        let span = self.tile_span(z);
        Extent::new(
            self.origin.x + range.min_x as f64 * span,
            self.origin.y - (range.max_y + 1) as f64 * span,
            self.origin.x + (range.max_x + 1) as f64 * span,
            self.origin.y - range.min_y as f64 * span,
        )
    }

    /// Shift `coord` by whole worlds so its center lies in the projection extent
    ///
    /// Only global projections wrap; others return `coord` unchanged.
    pub fn wrap_x(&self, coord: TileCoord, projection: &Projection) -> TileCoord {
        if !projection.is_global() {
            return coord;
        }
        let mut center = self.tile_coord_center(&coord);
        let projection_extent = projection.extent();
        if projection_extent.contains_coordinate(&center) {
            return coord;
        }
        let world_width = projection.world_width();
        let worlds_away = ((projection_extent.min_x - center.x) / world_width).ceil();
        center.x += world_width * worlds_away;
        self.tile_coord_for_coord_and_z(&center, coord.z)
    }

    /// Children of `coord` at `z + 1`, `None` at max zoom
    pub fn tile_coord_child_tile_range(&self, coord: &TileCoord) -> Option<TileRange> {
        if coord.z >= self.max_zoom {
            return None;
        }
        if self.zoom_factor == Some(2.0) {
            let (x, y) = (coord.x * 2, coord.y * 2);
            return Some(TileRange::new(x, x + 1, y, y + 1));
        }
        let extent = self.tile_coord_extent(coord);
        Some(self.tile_range_for_extent_and_z(&extent, coord.z + 1))
    }

    /// Walk ancestor ranges from `z - 1` down to min zoom
    ///
    /// Stops and returns `true` as soon as `callback` returns `true`.
    pub fn for_each_tile_coord_parent_tile_range<F>(&self, coord: &TileCoord, mut callback: F) -> bool
    where
        F: FnMut(u8, &TileRange) -> bool,
    {
        if coord.z == 0 || coord.z <= self.min_zoom {
            return false;
        }

        if self.zoom_factor == Some(2.0) {
            let (mut x, mut y) = (coord.x, coord.y);
            for z in (self.min_zoom..coord.z).rev() {
                x = x.div_euclid(2);
                y = y.div_euclid(2);
                if callback(z, &TileRange::single(x, y)) {
                    return true;
                }
            }
        } else {
            let extent = self.tile_coord_extent(coord);
            for z in (self.min_zoom..coord.z).rev() {
                let range = self.tile_range_for_extent_and_z(&extent, z);
                if callback(z, &range) {
                    return true;
                }
            }
        }
        false
    }
}

fn detect_zoom_factor(resolutions: &[f64]) -> Option<f64> {
    if resolutions.len() < 2 {
        return Some(2.0);
    }
    let first = resolutions[0] / resolutions[1];
    let constant = resolutions
        .windows(2)
        .all(|pair| ((pair[0] / pair[1]) - first).abs() < 1e-9);
    if !constant {
        return None;
    }
    if (first - 2.0).abs() < 1e-9 {
        Some(2.0)
    } else {
        Some(first)
    }
}

fn round_decimals(value: f64) -> f64 {
    let factor = 10f64.powi(INDEX_DECIMALS);
    (value * factor).round() / factor
}
