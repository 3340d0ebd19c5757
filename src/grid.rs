use crate::types::{BoundingBox, ClippedCell, GridCell};
use geo::{Area, BooleanOps, HaversineDistance, Intersects};
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// WGS84 equatorial radius used by the ring-area formula.
const EARTH_RADIUS_AREA_M: f64 = 6_378_137.0;

/// Grids above this many cells still run but are logged as oversized.
pub const LARGE_GRID_CELLS: usize = 1_000_000;

/// Tiles a bounding box into square cells of a fixed metric size.
///
/// The metric size is converted to degrees from the haversine length of the
/// box's southern and western edges, so cells are square on the ground at the
/// box's south-west corner. The grid starts at the south-west corner and
/// rounds the column and row counts up, so the last row and column may extend
/// past the box.
#[derive(Debug, Clone)]
pub struct GridBuilder {
    bbox: BoundingBox,
    cell_lon_deg: f64,
    cell_lat_deg: f64,
    columns: usize,
    rows: usize,
}

impl GridBuilder {
    /// `None` when the box has no extent on either axis.
    pub fn new(bbox: BoundingBox, cell_size_meters: f64) -> Option<Self> {
        if !(cell_size_meters > 0.0) || !(bbox.width() > 0.0) || !(bbox.height() > 0.0) {
            return None;
        }

        let south_west = Point::new(bbox.min_lon, bbox.min_lat);
        let width_m = south_west.haversine_distance(&Point::new(bbox.max_lon, bbox.min_lat));
        let height_m = south_west.haversine_distance(&Point::new(bbox.min_lon, bbox.max_lat));
        if !(width_m > 0.0) || !(height_m > 0.0) {
            return None;
        }

        let cell_lon_deg = cell_size_meters / width_m * bbox.width();
        let cell_lat_deg = cell_size_meters / height_m * bbox.height();

        let grid = Self {
            bbox,
            cell_lon_deg,
            cell_lat_deg,
            columns: span_count(bbox.width(), cell_lon_deg),
            rows: span_count(bbox.height(), cell_lat_deg),
        };
        if grid.is_large() {
            warn!(
                "Grid of {}x{} cells ({} m) exceeds {} cells; expect a slow run",
                grid.columns, grid.rows, cell_size_meters, LARGE_GRID_CELLS
            );
        }
        Some(grid)
    }

    pub fn is_large(&self) -> bool {
        self.len() > LARGE_GRID_CELLS
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell_size_degrees(&self) -> (f64, f64) {
        (self.cell_lon_deg, self.cell_lat_deg)
    }

    /// A fresh pass over every cell, row by row from the south.
    pub fn cells(&self) -> GridCells<'_> {
        GridCells {
            builder: self,
            next: 0,
        }
    }

    fn cell(&self, id: usize) -> GridCell {
        let row = id / self.columns;
        let col = id % self.columns;
        let min_lon = self.bbox.min_lon + col as f64 * self.cell_lon_deg;
        let min_lat = self.bbox.min_lat + row as f64 * self.cell_lat_deg;
        let max_lon = min_lon + self.cell_lon_deg;
        let max_lat = min_lat + self.cell_lat_deg;

        GridCell {
            id,
            row,
            col,
            geometry: Polygon::new(
                LineString::from(vec![
                    (min_lon, min_lat),
                    (max_lon, min_lat),
                    (max_lon, max_lat),
                    (min_lon, max_lat),
                    (min_lon, min_lat),
                ]),
                vec![],
            ),
        }
    }
}

fn span_count(extent: f64, step: f64) -> usize {
    // tolerate float noise so an exact fit does not grow an extra column
    ((extent / step) - 1e-9).ceil().max(1.0) as usize
}

pub struct GridCells<'a> {
    builder: &'a GridBuilder,
    next: usize,
}

impl Iterator for GridCells<'_> {
    type Item = GridCell;

    fn next(&mut self) -> Option<GridCell> {
        if self.next >= self.builder.len() {
            return None;
        }
        let cell = self.builder.cell(self.next);
        self.next += 1;
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.builder.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridCells<'_> {}

/// Intersects grid cells with the target polygon.
pub struct PolygonClipper<'a> {
    target: &'a Polygon<f64>,
}

impl<'a> PolygonClipper<'a> {
    pub fn new(target: &'a Polygon<f64>) -> Self {
        Self { target }
    }

    /// The part of `cell` inside the target, or `None` when there is no
    /// overlap with positive area. A failing boolean operation also yields
    /// `None` so one bad cell never aborts the run.
    pub fn clip(&self, cell: &GridCell) -> Option<ClippedCell> {
        if !cell.geometry.intersects(self.target) {
            return None;
        }

        let target = self.target;
        let clipped = match panic::catch_unwind(AssertUnwindSafe(|| {
            cell.geometry.intersection(target)
        })) {
            Ok(clipped) => clipped,
            Err(_) => {
                debug!("Clip of cell {} failed, dropping it", cell.id);
                return None;
            }
        };

        if !is_usable(&clipped) {
            return None;
        }

        let centroid = multi_vertex_centroid(&clipped)?;

        Some(ClippedCell {
            id: cell.id,
            geometry: clipped,
            centroid,
        })
    }

    /// Clips every cell of `grid`, keeping grid order.
    pub fn clip_grid(&self, grid: &GridBuilder) -> Vec<ClippedCell> {
        grid.cells().filter_map(|cell| self.clip(&cell)).collect()
    }
}

fn is_usable(geometry: &MultiPolygon<f64>) -> bool {
    let finite = geometry
        .iter()
        .flat_map(|p| p.exterior().coords())
        .all(|c| c.x.is_finite() && c.y.is_finite());
    finite && geometry.unsigned_area() > 0.0
}

/// Mean of every ring vertex, closing vertices excluded.
pub fn vertex_centroid(polygon: &Polygon<f64>) -> Option<Point<f64>> {
    ring_vertex_mean(rings(polygon))
}

/// [`vertex_centroid`] over all parts of a multipolygon.
pub fn multi_vertex_centroid(geometry: &MultiPolygon<f64>) -> Option<Point<f64>> {
    ring_vertex_mean(geometry.iter().flat_map(rings))
}

fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors())
}

fn ring_vertex_mean<'a>(rings: impl Iterator<Item = &'a LineString<f64>>) -> Option<Point<f64>> {
    let (mut sum_x, mut sum_y, mut n) = (0.0, 0.0, 0usize);
    for c in rings.flat_map(open_ring) {
        sum_x += c.x;
        sum_y += c.y;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some(Point::new(sum_x / n as f64, sum_y / n as f64))
        .filter(|p| p.x().is_finite() && p.y().is_finite())
}

pub fn distinct_vertex_count(polygon: &Polygon<f64>) -> usize {
    let coords = open_ring(polygon.exterior());
    let mut distinct: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
    for c in coords {
        if !distinct.contains(&c) {
            distinct.push(c);
        }
    }
    distinct.len()
}

/// Geodesic area in square meters from the spherical ring formula.
pub fn geodesic_area(polygon: &Polygon<f64>) -> f64 {
    let holes: f64 = polygon.interiors().iter().map(ring_area).sum();
    (ring_area(polygon.exterior()) - holes).max(0.0)
}

fn ring_area(ring: &LineString<f64>) -> f64 {
    let coords = open_ring(ring);
    if coords.len() < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..coords.len() {
        let j = (i + 1) % coords.len();
        let xi = coords[i].x.to_radians();
        let yi = coords[i].y.to_radians();
        let xj = coords[j].x.to_radians();
        let yj = coords[j].y.to_radians();
        area += (xj - xi) * (2.0 + yi.sin() + yj.sin());
    }
    (area * EARTH_RADIUS_AREA_M * EARTH_RADIUS_AREA_M / 2.0).abs()
}

fn open_ring(ring: &LineString<f64>) -> Vec<Coord<f64>> {
    let mut coords: Vec<Coord<f64>> = ring.coords().copied().collect();
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    coords
}

/// Half-widths in degrees `(lon, lat)` of a box spanning `meters` around
/// `latitude`, with the fixed meters-per-degree scale on the meridian.
///
/// The longitude half-width is the latitude one divided by `cos(latitude)`
/// rather than the plain equator-scale value, so away from the equator the
/// box still holds every footprint within `meters` of the centre.
pub fn meters_to_degrees(meters: f64, latitude: f64, meters_per_degree: f64) -> (f64, f64) {
    let lat_deg = meters / meters_per_degree;
    // widen longitude towards the poles; clamp so the box stays finite
    let cos_lat = latitude.to_radians().cos().abs().max(1e-6);
    (lat_deg / cos_lat, lat_deg)
}
