use crate::geojson_io::parse_footprints;
use crate::types::{AnalysisError, BoundingBox, BuildingFootprint};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Source of building footprints around an installation area.
///
/// An `Err` is not fatal: the pipeline substitutes an empty set and marks the
/// run degraded.
#[async_trait]
pub trait BuildingProvider: Send + Sync {
    async fn fetch(&self, bbox: BoundingBox) -> Result<Vec<BuildingFootprint>, AnalysisError>;
}

fn within(footprints: &[BuildingFootprint], bbox: &BoundingBox) -> Vec<BuildingFootprint> {
    footprints
        .iter()
        .filter(|f| {
            BoundingBox::of_polygon(&f.geometry)
                .map(|b| b.intersects(bbox))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Serves a fixed in-memory footprint set.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    footprints: Vec<BuildingFootprint>,
}

impl StaticProvider {
    pub fn new(footprints: Vec<BuildingFootprint>) -> Self {
        Self { footprints }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildingProvider for StaticProvider {
    async fn fetch(&self, bbox: BoundingBox) -> Result<Vec<BuildingFootprint>, AnalysisError> {
        Ok(within(&self.footprints, &bbox))
    }
}

/// Reads footprints from a GeoJSON FeatureCollection on every fetch.
#[derive(Debug, Clone)]
pub struct GeoJsonFileProvider {
    path: PathBuf,
}

impl GeoJsonFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BuildingProvider for GeoJsonFileProvider {
    async fn fetch(&self, bbox: BoundingBox) -> Result<Vec<BuildingFootprint>, AnalysisError> {
        let json = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AnalysisError::Provider(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let footprints = parse_footprints(&json)?;
        let selected = within(&footprints, &bbox);
        debug!(
            "Read {} footprints from {}, {} near the area",
            footprints.len(),
            self.path.display(),
            selected.len()
        );
        Ok(selected)
    }
}
