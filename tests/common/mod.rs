#![allow(dead_code)]

use async_trait::async_trait;
use geo_types::{LineString, Polygon};
use solar_grid::{
    AnalysisConfig, AnalysisError, BoundingBox, BuildingFootprint, BuildingProvider,
    SunSamplingConfig,
};

/// Haversine meters per degree of latitude.
pub const METERS_PER_DEGREE: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;

/// Axis-aligned square of `size_m` meters with its south-west corner at
/// (`lon`, `lat`).
pub fn square_polygon(lon: f64, lat: f64, size_m: f64) -> Polygon<f64> {
    let dlat = size_m / METERS_PER_DEGREE;
    let dlon = dlat / lat.to_radians().cos();
    Polygon::new(
        LineString::from(vec![
            (lon, lat),
            (lon + dlon, lat),
            (lon + dlon, lat + dlat),
            (lon, lat + dlat),
        ]),
        vec![],
    )
}

/// L-shaped area: a `size_m` square with its north-east quarter removed.
pub fn l_shaped_polygon(lon: f64, lat: f64, size_m: f64) -> Polygon<f64> {
    let dlat = size_m / METERS_PER_DEGREE;
    let dlon = dlat / lat.to_radians().cos();
    Polygon::new(
        LineString::from(vec![
            (lon, lat),
            (lon + dlon, lat),
            (lon + dlon, lat + dlat / 2.0),
            (lon + dlon / 2.0, lat + dlat / 2.0),
            (lon + dlon / 2.0, lat + dlat),
            (lon, lat + dlat),
        ]),
        vec![],
    )
}

/// A 4 m square footprint centred at the given offset from (`lon`, `lat`).
pub fn building_at(lon: f64, lat: f64, east_m: f64, north_m: f64, height: &str) -> BuildingFootprint {
    let cos_lat = lat.to_radians().cos();
    let cx = lon + east_m / (METERS_PER_DEGREE * cos_lat);
    let cy = lat + north_m / METERS_PER_DEGREE;
    let h = 2.0 / METERS_PER_DEGREE;
    let w = h / cos_lat;
    BuildingFootprint::with_height(
        Polygon::new(
            LineString::from(vec![
                (cx - w, cy - h),
                (cx + w, cy - h),
                (cx + w, cy + h),
                (cx - w, cy + h),
            ]),
            vec![],
        ),
        height,
    )
}

/// Default config with the given local sample hours.
pub fn config_with_hours(cell_size: u32, hours: Vec<u32>) -> AnalysisConfig {
    AnalysisConfig {
        cell_size_meters: cell_size,
        worker_threads: Some(2),
        sun: SunSamplingConfig {
            hours,
            ..SunSamplingConfig::default()
        },
        ..AnalysisConfig::default()
    }
}

/// Daytime hours; at the equator the sun is up for all of them.
pub fn daytime_config(cell_size: u32) -> AnalysisConfig {
    config_with_hours(cell_size, vec![9, 12, 15])
}

/// Night hours; the sun is below the horizon for all of them.
pub fn night_config(cell_size: u32) -> AnalysisConfig {
    config_with_hours(cell_size, vec![0, 2, 22])
}

pub struct FailingProvider;

#[async_trait]
impl BuildingProvider for FailingProvider {
    async fn fetch(&self, _bbox: BoundingBox) -> Result<Vec<BuildingFootprint>, AnalysisError> {
        Err(AnalysisError::Provider("overpass timed out".to_string()))
    }
}
