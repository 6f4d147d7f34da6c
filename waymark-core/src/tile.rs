//! Tile grid maths.
//!
//! Bulk reads are paged by fixed-size tiles of the web-Mercator grid. Each
//! cache fetches at its own zoom level regardless of the zoom the map is
//! rendered at, so panning a zoomed-in view keeps reusing the same tiles.
//!
//! The projection is supplied by the renderer through the [`Projection`]
//! trait; [`MercatorProjection`] is a plain spherical implementation.

use std::{
    f64::consts::{FRAC_PI_2, FRAC_PI_4, TAU},
    fmt,
};

use geo::{Coord, Rect};

/// Edge length, in pixels, of a tile rendered at its native zoom.
pub const TILE_SIZE: f64 = 256.0;

/// Maps geographic coordinates to viewport pixels and back.
///
/// Pixel coordinates grow right and down. `scale` is the radius of the world
/// in pixels, so the whole world spans `scale * 2π` pixels horizontally.
pub trait Projection {
    /// World radius in pixels.
    fn scale(&self) -> f64;
    /// Pixel offset of the `(0°, 0°)` point.
    fn translate(&self) -> [f64; 2];
    /// Project a WGS84 coordinate to pixels.
    fn project(&self, location: Coord<f64>) -> [f64; 2];
    /// Invert a pixel position to a WGS84 coordinate.
    fn invert(&self, point: [f64; 2]) -> Coord<f64>;
    /// Visible pixel rectangle as `[[min_x, min_y], [max_x, max_y]]`.
    fn clip_extent(&self) -> [[f64; 2]; 2];
}

/// Width and height of the visible map in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl Viewport {
    /// Construct a viewport of the given pixel size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Spherical web-Mercator projection.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use waymark_core::{MercatorProjection, Projection, Viewport};
///
/// let centre = Coord { x: -0.1276, y: 51.5072 };
/// let projection = MercatorProjection::centred(centre, 16.0, Viewport::new(800.0, 600.0));
/// let [x, y] = projection.project(centre);
/// assert!((x - 400.0).abs() < 1e-6);
/// assert!((y - 300.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MercatorProjection {
    scale: f64,
    translate: [f64; 2],
    clip_extent: [[f64; 2]; 2],
}

impl MercatorProjection {
    /// Build a projection from raw scale and translation. The clip extent
    /// defaults to an empty rectangle at the origin.
    #[must_use]
    pub const fn new(scale: f64, translate: [f64; 2]) -> Self {
        Self {
            scale,
            translate,
            clip_extent: [[0.0, 0.0], [0.0, 0.0]],
        }
    }

    /// Build a projection showing `centre` in the middle of `viewport` at a
    /// fractional slippy-map `zoom`.
    #[must_use]
    #[expect(clippy::float_arithmetic, reason = "projection maths is floating point")]
    pub fn centred(centre: Coord<f64>, zoom: f64, viewport: Viewport) -> Self {
        let scale = TILE_SIZE * zoom.exp2() / TAU;
        let [x, y] = raw_mercator(centre);
        Self {
            scale,
            translate: [
                viewport.width / 2.0 - x * scale,
                viewport.height / 2.0 - y * scale,
            ],
            clip_extent: [[0.0, 0.0], [viewport.width, viewport.height]],
        }
    }

    /// Replace the visible pixel rectangle.
    #[must_use]
    pub const fn with_clip_extent(mut self, clip_extent: [[f64; 2]; 2]) -> Self {
        self.clip_extent = clip_extent;
        self
    }
}

#[expect(clippy::float_arithmetic, reason = "spherical Mercator is floating point")]
fn raw_mercator(location: Coord<f64>) -> [f64; 2] {
    let lambda = location.x.to_radians();
    let phi = location.y.to_radians();
    [lambda, -(FRAC_PI_4 + phi / 2.0).tan().ln()]
}

#[expect(clippy::float_arithmetic, reason = "projection maths is floating point")]
impl Projection for MercatorProjection {
    fn scale(&self) -> f64 {
        self.scale
    }

    fn translate(&self) -> [f64; 2] {
        self.translate
    }

    fn project(&self, location: Coord<f64>) -> [f64; 2] {
        let [x, y] = raw_mercator(location);
        [
            x * self.scale + self.translate[0],
            y * self.scale + self.translate[1],
        ]
    }

    fn invert(&self, point: [f64; 2]) -> Coord<f64> {
        let x = (point[0] - self.translate[0]) / self.scale;
        let y = (point[1] - self.translate[1]) / self.scale;
        Coord {
            x: x.to_degrees(),
            y: (2.0 * (-y).exp().atan() - FRAC_PI_2).to_degrees(),
        }
    }

    fn clip_extent(&self) -> [[f64; 2]; 2] {
        self.clip_extent
    }
}

/// Grid position of a tile. Formats as `x,y,z`, which is the key used by the
/// loaded and in-flight bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCoord {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Zoom level of the grid.
    pub z: u8,
}

impl TileCoord {
    /// Construct a tile coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// A tile together with its geographic extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    /// Grid position.
    pub coord: TileCoord,
    /// WGS84 bounds (`min` = south-west, `max` = north-east).
    pub extent: Rect<f64>,
}

/// Format a bounding box as the `W,S,E,N` query parameter used by bulk reads.
///
/// # Examples
/// ```
/// use geo::{Coord, Rect};
/// use waymark_core::bbox_param;
///
/// let rect = Rect::new(Coord { x: -0.5, y: 51.25 }, Coord { x: 0.25, y: 51.5 });
/// assert_eq!(bbox_param(&rect), "-0.5,51.25,0.25,51.5");
/// ```
#[must_use]
pub fn bbox_param(extent: &Rect<f64>) -> String {
    let min = extent.min();
    let max = extent.max();
    format!("{},{},{},{}", min.x, min.y, max.x, max.y)
}

/// Enumerate the tiles of the `tile_zoom` grid that cover the viewport.
///
/// The grid zoom is derived from the projection scale: when the map is
/// rendered above `tile_zoom` each tile spans more than [`TILE_SIZE`] pixels,
/// below it less. Tiles outside the world grid are never produced. Tiles are
/// returned row by row.
#[must_use]
#[expect(clippy::float_arithmetic, reason = "tile extents are derived in pixel space")]
pub fn tiles_covering(
    projection: &dyn Projection,
    viewport: Viewport,
    tile_zoom: u8,
) -> Vec<Tile> {
    let world = projection.scale() * TAU;
    let zoom = (world.log2() - 8.0).max(0.0);
    let tile_size = TILE_SIZE * (zoom - f64::from(tile_zoom)).exp2();
    let [translate_x, translate_y] = projection.translate();
    let origin = [world / 2.0 - translate_x, world / 2.0 - translate_y];

    let columns = grid_span(origin[0], viewport.width, tile_size, tile_zoom);
    let rows = grid_span(origin[1], viewport.height, tile_size, tile_zoom);

    let mut tiles = Vec::new();
    for row in rows {
        for column in columns.clone() {
            let x = f64::from(column) * tile_size - origin[0];
            let y = f64::from(row) * tile_size - origin[1];
            let south_west = projection.invert([x, y + tile_size]);
            let north_east = projection.invert([x + tile_size, y]);
            tiles.push(Tile {
                coord: TileCoord::new(column, row, tile_zoom),
                extent: Rect::new(south_west, north_east),
            });
        }
    }
    tiles
}

/// Range of grid indices overlapping `[0, extent)` pixels along one axis.
#[expect(clippy::float_arithmetic, reason = "grid indices are derived in pixel space")]
fn grid_span(origin: f64, extent: f64, tile_size: f64, tile_zoom: u8) -> std::ops::Range<u32> {
    let limit = f64::from(1_u32 << u32::from(tile_zoom.min(31)));
    let offset = origin / tile_size;
    let first = offset.floor().clamp(0.0, limit);
    let last = ((extent / tile_size) + offset).ceil().clamp(0.0, limit);
    to_index(first)..to_index(last)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "values are clamped to the non-negative grid range before conversion"
)]
fn to_index(value: f64) -> u32 {
    value as u32
}

/// Geographic bounding box of the projection's visible area.
#[must_use]
pub fn visible_extent(projection: &dyn Projection) -> Rect<f64> {
    let [[min_x, min_y], [max_x, max_y]] = projection.clip_extent();
    let south_west = projection.invert([min_x, max_y]);
    let north_east = projection.invert([max_x, min_y]);
    Rect::new(south_west, north_east)
}
