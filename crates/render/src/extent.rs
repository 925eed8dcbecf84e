//! Map-space geometry
//!
//! Coordinates, extents and the projection description the tile grid needs.
//! Transform math between projections is out of scope; a projection here is
//! only an identifier, its valid extent, and whether it wraps horizontally.

/// A point in map units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn squared_distance(&self, other: &Coordinate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn distance(&self, other: &Coordinate) -> f64 {
        self.squared_distance(other).sqrt()
    }
}

/// Axis-aligned rectangle in map units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Extent of `size` pixels around `center` at `resolution`
    pub fn for_view(center: Coordinate, resolution: f64, size: (u32, u32)) -> Self {
        let half_width = size.0 as f64 * resolution / 2.0;
        let half_height = size.1 as f64 * resolution / 2.0;
        Self::new(
            center.x - half_width,
            center.y - half_height,
            center.x + half_width,
            center.y + half_height,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn top_left(&self) -> Coordinate {
        Coordinate::new(self.min_x, self.max_y)
    }

    pub fn bottom_right(&self) -> Coordinate {
        Coordinate::new(self.max_x, self.min_y)
    }

    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    /// Inclusive on all edges
    pub fn contains_coordinate(&self, coordinate: &Coordinate) -> bool {
        self.contains_xy(coordinate.x, coordinate.y)
    }

    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= y && y <= self.max_y
    }

    pub fn contains_extent(&self, other: &Extent) -> bool {
        self.min_x <= other.min_x
            && other.max_x <= self.max_x
            && self.min_y <= other.min_y
            && other.max_y <= self.max_y
    }

    /// True when the extents overlap or touch
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Overlap of two extents, `None` when they are disjoint
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        if !self.intersects(other) {
            return None;
        }
        Some(Extent::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    pub fn buffer(&self, value: f64) -> Extent {
        Extent::new(
            self.min_x - value,
            self.min_y - value,
            self.max_x + value,
            self.max_y + value,
        )
    }
}

/// Map projection as far as tile addressing is concerned
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    code: String,
    extent: Extent,
    global: bool,
}

/// Half the circumference of the Web Mercator sphere in metres
pub const WEB_MERCATOR_HALF_SIZE: f64 = 20_037_508.342_789_244;

impl Projection {
    pub fn new(code: impl Into<String>, extent: Extent, global: bool) -> Self {
        Self {
            code: code.into(),
            extent,
            global,
        }
    }

    /// Spherical Mercator (EPSG:3857), wraps horizontally
    pub fn web_mercator() -> Self {
        let half = WEB_MERCATOR_HALF_SIZE;
        Self::new("EPSG:3857", Extent::new(-half, -half, half, half), true)
    }

    /// Geographic WGS 84 (EPSG:4326), wraps horizontally
    pub fn wgs84() -> Self {
        Self::new("EPSG:4326", Extent::new(-180.0, -90.0, 180.0, 90.0), true)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    /// Whether x wraps around at the extent edges
    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn world_width(&self) -> f64 {
        self.extent.width()
    }
}
