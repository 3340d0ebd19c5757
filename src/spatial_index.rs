use crate::grid::vertex_centroid;
use crate::types::{BoundingBox, BuildingFootprint, FootprintProperties};
use geo_types::Point;
use rstar::{RTree, RTreeObject, AABB};
use tracing::debug;

/// Fallback chain for footprints without a usable height tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightRules {
    pub default_height: f64,
    pub meters_per_level: f64,
}

impl Default for HeightRules {
    fn default() -> Self {
        Self {
            default_height: 6.0,
            meters_per_level: 3.0,
        }
    }
}

impl HeightRules {
    /// `height` tag (unit suffix stripped), then `building:levels` times the
    /// storey height, then the default.
    ///
    /// A tag only counts when it parses to a finite, non-negative number. A
    /// negative `height` such as `-3` is treated like a missing one and falls
    /// through to the levels and default steps.
    pub fn resolve(&self, properties: &FootprintProperties) -> f64 {
        if let Some(height) = properties.height.as_deref().and_then(parse_height) {
            return height;
        }
        if let Some(levels) = properties.levels.as_deref().and_then(parse_non_negative) {
            return levels * self.meters_per_level;
        }
        self.default_height
    }
}

fn parse_height(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let number = trimmed
        .strip_suffix(['m', 'M'])
        .unwrap_or(trimmed)
        .trim_end();
    parse_non_negative(number)
}

fn parse_non_negative(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// A footprint reduced to what obstruction tests need.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFootprint {
    pub id: usize,
    pub centroid: Point<f64>,
    pub height: f64,
    envelope: AABB<[f64; 2]>,
}

impl IndexedFootprint {
    pub fn bounds(&self) -> BoundingBox {
        let lower = self.envelope.lower();
        let upper = self.envelope.upper();
        BoundingBox::new(lower[0], lower[1], upper[0], upper[1])
    }
}

impl RTreeObject for IndexedFootprint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Read-only R-tree over footprint bounding boxes.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexedFootprint>,
}

impl SpatialIndex {
    /// Bulk-loads every footprint in one pass. Heights are resolved here so
    /// queries never re-parse tags. Footprints without a usable ring are
    /// skipped.
    pub fn bulk_load(footprints: &[BuildingFootprint], rules: &HeightRules) -> Self {
        let items: Vec<IndexedFootprint> = footprints
            .iter()
            .enumerate()
            .filter_map(|(id, footprint)| {
                let bbox = BoundingBox::of_polygon(&footprint.geometry)?;
                let centroid = vertex_centroid(&footprint.geometry)?;
                Some(IndexedFootprint {
                    id,
                    centroid,
                    height: rules.resolve(&footprint.properties),
                    envelope: AABB::from_corners(
                        [bbox.min_lon, bbox.min_lat],
                        [bbox.max_lon, bbox.max_lat],
                    ),
                })
            })
            .collect();

        if items.len() < footprints.len() {
            debug!(
                "Skipped {} footprints without usable geometry",
                footprints.len() - items.len()
            );
        }

        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn empty() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Footprints whose bounding box intersects `query`.
    pub fn query<'a>(
        &'a self,
        query: &BoundingBox,
    ) -> impl Iterator<Item = &'a IndexedFootprint> + 'a {
        let envelope = AABB::from_corners(
            [query.min_lon, query.min_lat],
            [query.max_lon, query.max_lat],
        );
        self.tree.locate_in_envelope_intersecting(&envelope)
    }
}
