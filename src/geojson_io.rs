//! GeoJSON input for polygons and footprints, GeoJSON/CSV output for results.

use crate::grid::multi_vertex_centroid;
use crate::types::*;
use geo_types::{LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;

type Ring = Vec<Vec<f64>>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Document {
    FeatureCollection { features: Vec<Feature> },
    Feature(Feature),
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<FootprintProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon {
        coordinates: Vec<Ring>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Ring>>,
    },
    #[serde(other)]
    Unsupported,
}

impl Geometry {
    fn into_polygons(self) -> Result<Vec<Polygon<f64>>, AnalysisError> {
        match self {
            Geometry::Polygon { coordinates } => Ok(vec![polygon_from_rings(&coordinates)?]),
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect(),
            Geometry::Unsupported => Ok(Vec::new()),
        }
    }
}

fn polygon_from_rings(rings: &[Ring]) -> Result<Polygon<f64>, AnalysisError> {
    let (exterior, holes) = rings
        .split_first()
        .ok_or_else(|| AnalysisError::InvalidPolygon("polygon has no rings".to_string()))?;
    let exterior = polygon_from_ring(exterior)?.into_inner().0;
    let holes = holes
        .iter()
        .map(|ring| polygon_from_ring(ring).map(|p| p.into_inner().0))
        .collect::<Result<Vec<LineString<f64>>, _>>()?;
    Ok(Polygon::new(exterior, holes))
}

/// Reads footprints from a GeoJSON FeatureCollection. Multipolygon features
/// become one footprint per part; non-areal features are ignored.
pub fn parse_footprints(json: &str) -> Result<Vec<BuildingFootprint>, AnalysisError> {
    let features = match serde_json::from_str::<Document>(json)? {
        Document::FeatureCollection { features } => features,
        Document::Feature(feature) => vec![feature],
        _ => {
            return Err(AnalysisError::Provider(
                "footprints must be a Feature or FeatureCollection".to_string(),
            ))
        }
    };

    let mut footprints = Vec::new();
    for feature in features {
        let properties = feature.properties.unwrap_or_default();
        let Some(geometry) = feature.geometry else {
            continue;
        };
        for polygon in geometry.into_polygons()? {
            footprints.push(BuildingFootprint::new(polygon, properties.clone()));
        }
    }
    Ok(footprints)
}

/// Reads the installation-area polygon: a bare `[[lon, lat], ...]` ring, a
/// Polygon geometry, a Feature, or the first polygon of a FeatureCollection.
pub fn parse_polygon(json: &str) -> Result<Polygon<f64>, AnalysisError> {
    let value: Value = serde_json::from_str(json)?;
    if value.is_array() {
        let ring: Ring = serde_json::from_value(value)?;
        return polygon_from_ring(&ring);
    }

    let polygons = match serde_json::from_value::<Document>(value)? {
        Document::Polygon { coordinates } => vec![polygon_from_rings(&coordinates)?],
        Document::MultiPolygon { coordinates } => coordinates
            .iter()
            .map(|rings| polygon_from_rings(rings))
            .collect::<Result<_, _>>()?,
        Document::Feature(feature) => match feature.geometry {
            Some(geometry) => geometry.into_polygons()?,
            None => Vec::new(),
        },
        Document::FeatureCollection { features } => {
            let mut polygons = Vec::new();
            for geometry in features.into_iter().filter_map(|f| f.geometry) {
                polygons.extend(geometry.into_polygons()?);
            }
            polygons
        }
    };

    polygons
        .into_iter()
        .next()
        .ok_or_else(|| AnalysisError::InvalidPolygon("no polygon geometry found".to_string()))
}

pub fn read_polygon(path: &Path) -> Result<Polygon<f64>, AnalysisError> {
    parse_polygon(&std::fs::read_to_string(path)?)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn ring_coordinates(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn polygon_coordinates(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![ring_coordinates(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_coordinates));
    Value::Array(rings)
}

fn geometry_value(geometry: &MultiPolygon<f64>) -> Value {
    match geometry.0.as_slice() {
        [single] => json!({
            "type": "Polygon",
            "coordinates": polygon_coordinates(single),
        }),
        parts => json!({
            "type": "MultiPolygon",
            "coordinates": Value::Array(parts.iter().map(polygon_coordinates).collect()),
        }),
    }
}

/// The overlay FeatureCollection: one feature per clipped cell plus run
/// metadata. Key order is stable, so equal results serialize identically.
pub fn to_feature_collection(result: &AnalysisResult) -> Result<Value, AnalysisError> {
    let features: Vec<Value> = result
        .cells
        .iter()
        .map(|cell| {
            json!({
                "type": "Feature",
                "geometry": geometry_value(&cell.geometry),
                "properties": {
                    "id": cell.id,
                    "score": round3(cell.score),
                    "shading_fraction": round3(cell.shading_fraction),
                    "color": cell.classification.color(),
                    "label": cell.classification.label(),
                },
            })
        })
        .collect();

    let mut collection = Map::new();
    collection.insert("type".to_string(), json!("FeatureCollection"));
    collection.insert("features".to_string(), Value::Array(features));
    collection.insert("metadata".to_string(), serde_json::to_value(&result.metadata)?);
    Ok(Value::Object(collection))
}

pub fn to_geojson_string(result: &AnalysisResult) -> Result<String, AnalysisError> {
    Ok(serde_json::to_string(&to_feature_collection(result)?)?)
}

pub fn write_geojson(path: &Path, result: &AnalysisResult) -> Result<(), AnalysisError> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), &to_feature_collection(result)?)?;
    Ok(())
}

/// One row per cell and sun sample with the blocked flag.
pub fn write_csv(path: &Path, result: &AnalysisResult) -> Result<(), AnalysisError> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);

    writeln!(
        file,
        "cell_id,lat,lon,datetime,local_hour,sun_altitude_deg,blocked,score"
    )?;

    for (row, cell) in result.cells.iter().enumerate() {
        let (lon, lat) = multi_vertex_centroid(&cell.geometry)
            .map(|p| (p.x(), p.y()))
            .unwrap_or((f64::NAN, f64::NAN));

        for (col, sample) in result.samples.iter().enumerate() {
            let blocked = result.occlusion.get([row, col]).copied().unwrap_or(0);
            writeln!(
                file,
                "{},{:.6},{:.6},{},{},{:.3},{},{:.3}",
                cell.id,
                lat,
                lon,
                sample.instant.to_rfc3339(),
                sample.local_hour,
                sample.altitude.to_degrees(),
                blocked,
                cell.score
            )?;
        }
    }

    file.flush()?;
    Ok(())
}
