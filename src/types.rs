use chrono::{DateTime, NaiveDate, Utc};
use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize};

/// Axis-aligned box in the input's (lon, lat) degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Bounding box of a polygon's exterior ring, `None` for an empty or
    /// non-finite ring.
    pub fn of_polygon(polygon: &Polygon<f64>) -> Option<Self> {
        Self::of_coords(polygon.exterior().coords())
    }

    pub fn of_coords<'a>(coords: impl Iterator<Item = &'a Coord<f64>>) -> Option<Self> {
        let mut bbox: Option<Self> = None;
        for c in coords {
            if !c.x.is_finite() || !c.y.is_finite() {
                return None;
            }
            bbox = Some(match bbox {
                None => Self::new(c.x, c.y, c.x, c.y),
                Some(b) => Self::new(
                    b.min_lon.min(c.x),
                    b.min_lat.min(c.y),
                    b.max_lon.max(c.x),
                    b.max_lat.max(c.y),
                ),
            });
        }
        bbox
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// `[minLon, minLat, maxLon, maxLat]`, the provider wire order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// One square tile of the subdivision grid before clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub id: usize,
    pub row: usize,
    pub col: usize,
    pub geometry: Polygon<f64>,
}

/// A grid cell after intersection with the target polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedCell {
    pub id: usize,
    pub geometry: MultiPolygon<f64>,
    pub centroid: Point<f64>,
}

/// Raw height tags as supplied by the footprint provider. Numeric tag
/// values are accepted and kept in their string form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FootprintProperties {
    #[serde(default, deserialize_with = "string_or_number")]
    pub height: Option<String>,
    #[serde(
        rename = "building:levels",
        default,
        deserialize_with = "string_or_number"
    )]
    pub levels: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tag {
        Text(String),
        Number(f64),
    }

    Ok(Option::<Tag>::deserialize(deserializer)?.map(|tag| match tag {
        Tag::Text(text) => text,
        Tag::Number(number) => number.to_string(),
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingFootprint {
    pub geometry: Polygon<f64>,
    pub properties: FootprintProperties,
}

impl BuildingFootprint {
    pub fn new(geometry: Polygon<f64>, properties: FootprintProperties) -> Self {
        Self {
            geometry,
            properties,
        }
    }

    pub fn with_height(geometry: Polygon<f64>, height: &str) -> Self {
        Self::new(
            geometry,
            FootprintProperties {
                height: Some(height.to_string()),
                levels: None,
            },
        )
    }
}

/// Sun position for one representative date and local hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunSample {
    pub date: NaiveDate,
    pub local_hour: u32,
    pub instant: DateTime<Utc>,
    /// Radians above the horizon.
    pub altitude: f64,
    /// Radians clockwise from north.
    pub azimuth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Low,
    Medium,
    High,
}

impl Classification {
    pub const MEDIUM_THRESHOLD: f64 = 0.25;
    pub const HIGH_THRESHOLD: f64 = 0.60;

    /// Half-open thresholds: 0.25 is Medium, 0.60 is High.
    pub fn from_score(score: f64) -> Self {
        if score < Self::MEDIUM_THRESHOLD {
            Classification::Low
        } else if score < Self::HIGH_THRESHOLD {
            Classification::Medium
        } else {
            Classification::High
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Classification::Low => "#e63946",
            Classification::Medium => "#f4d35e",
            Classification::High => "#2a9d8f",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Low => "No potential",
            Classification::Medium => "Medium potential",
            Classification::High => "High potential",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellAnalysis {
    pub id: usize,
    pub score: f64,
    pub shading_fraction: f64,
    pub classification: Classification,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl ClassSummary {
    pub fn from_cells(cells: &[CellAnalysis]) -> Self {
        let mut summary = Self::default();
        for cell in cells {
            match cell.classification {
                Classification::High => summary.high += 1,
                Classification::Medium => summary.medium += 1,
                Classification::Low => summary.low += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub version: u64,
    pub cell_size_meters: u32,
    pub sample_count: usize,
    pub status: RunStatus,
    pub area_square_meters: f64,
    pub centroid: Option<[f64; 2]>,
    pub summary: ClassSummary,
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub cells: Vec<CellAnalysis>,
    pub samples: Vec<SunSample>,
    /// Blocked flags, one row per cell and one column per sun sample.
    pub occlusion: Array2<u8>,
    pub metadata: RunMetadata,
}

impl AnalysisResult {
    /// A run with zero cells, used for degenerate input polygons.
    pub fn empty(version: u64, cell_size_meters: u32, status: RunStatus) -> Self {
        Self {
            cells: Vec::new(),
            samples: Vec::new(),
            occlusion: Array2::zeros((0, 0)),
            metadata: RunMetadata {
                version,
                cell_size_meters,
                sample_count: 0,
                status,
                area_square_meters: 0.0,
                centroid: None,
                summary: ClassSummary::default(),
            },
        }
    }

    pub fn status(&self) -> RunStatus {
        self.metadata.status
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Builds a polygon from `[lon, lat]` pairs, closing the ring if needed.
pub fn polygon_from_ring(ring: &[Vec<f64>]) -> Result<Polygon<f64>, AnalysisError> {
    if ring.is_empty() {
        return Err(AnalysisError::InvalidPolygon("ring is empty".to_string()));
    }

    let coords = ring
        .iter()
        .map(|coord| {
            if coord.len() >= 2 {
                Ok((coord[0], coord[1]))
            } else {
                Err(AnalysisError::InvalidPolygon(format!(
                    "coordinate has {} components, expected at least 2",
                    coord.len()
                )))
            }
        })
        .collect::<Result<Vec<(f64, f64)>, _>>()?;

    // geo-types closes the ring on construction
    Ok(Polygon::new(LineString::from(coords), vec![]))
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Building provider error: {0}")]
    Provider(String),
    #[error("Invalid polygon: {0}")]
    InvalidPolygon(String),
}
