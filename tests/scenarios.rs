mod common;

use common::*;
use geo::{Area, BooleanOps};
use solar_grid::geojson_io::to_geojson_string;
use solar_grid::pipeline::compute_result;
use solar_grid::shadow_engine::ShadowEvaluator;
use solar_grid::spatial_index::{HeightRules, SpatialIndex};
use solar_grid::{
    AnalysisPipeline, BoundingBox, Classification, RunStatus, StaticProvider, SunSample,
};
use std::sync::Arc;

#[tokio::test]
async fn scenario_a_open_sky_scores_high_everywhere() {
    let polygon = square_polygon(0.0, 0.0, 100.0);
    let pipeline =
        AnalysisPipeline::new(daytime_config(10), Arc::new(StaticProvider::empty())).unwrap();

    let outcome = pipeline.run(polygon).await;
    let result = &outcome.result;

    assert!(outcome.published);
    assert_eq!(result.status(), RunStatus::Ok);
    assert_eq!(result.cells.len(), 100);
    assert_eq!(result.metadata.sample_count, 6);
    assert_eq!(result.metadata.cell_size_meters, 10);
    assert!(result.samples.iter().all(|s| s.altitude > 0.0));

    for cell in &result.cells {
        assert_eq!(cell.shading_fraction, 0.0);
        assert_eq!(cell.score, 1.0);
        assert_eq!(cell.classification, Classification::High);
        assert_eq!(cell.classification.label(), "High potential");
    }
    assert_eq!(result.metadata.summary.high, 100);
}

#[tokio::test]
async fn scenario_b_sun_below_horizon_blocks_everything() {
    let polygon = square_polygon(0.0, 0.0, 100.0);
    let pipeline =
        AnalysisPipeline::new(night_config(10), Arc::new(StaticProvider::empty())).unwrap();

    let result = pipeline.run(polygon).await.result;

    assert!(!result.cells.is_empty());
    assert!(result.samples.iter().all(|s| s.altitude <= 0.0));
    for cell in &result.cells {
        assert_eq!(cell.shading_fraction, 1.0);
        assert_eq!(cell.score, 0.0);
        assert_eq!(cell.classification.label(), "No potential");
        assert_eq!(cell.classification.color(), "#e63946");
    }
    assert!(result.occlusion.iter().all(|&flag| flag == 1));
}

#[test]
fn scenario_c_thirty_meter_building_at_twenty_meters() {
    let (lon, lat) = (8.5, 47.3);
    let footprints = vec![building_at(lon, lat, 0.0, 20.0, "30")];
    let index = SpatialIndex::bulk_load(&footprints, &HeightRules::default());
    let evaluator = ShadowEvaluator::new(&index, 200.0, 111_320.0);

    let sun = SunSample {
        date: chrono::NaiveDate::from_ymd_opt(2025, 6, 21).unwrap(),
        local_hour: 12,
        instant: chrono::DateTime::parse_from_rfc3339("2025-06-21T10:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc),
        altitude: 45f64.to_radians(),
        azimuth: std::f64::consts::PI,
    };

    assert!(evaluator.is_blocked(geo_types::Point::new(lon, lat), &sun));

    let lower = vec![building_at(lon, lat, 0.0, 20.0, "18")];
    let index = SpatialIndex::bulk_load(&lower, &HeightRules::default());
    let evaluator = ShadowEvaluator::new(&index, 200.0, 111_320.0);
    assert!(!evaluator.is_blocked(geo_types::Point::new(lon, lat), &sun));
}

#[tokio::test]
async fn scenario_d_provider_failure_degrades_but_still_covers() {
    let polygon = square_polygon(0.0, 0.0, 100.0);

    let healthy =
        AnalysisPipeline::new(daytime_config(10), Arc::new(StaticProvider::empty())).unwrap();
    let failing = AnalysisPipeline::new(daytime_config(10), Arc::new(FailingProvider)).unwrap();

    let expected = healthy.run(polygon.clone()).await.result;
    let outcome = failing.run(polygon).await;

    assert!(outcome.published);
    assert_eq!(outcome.result.status(), RunStatus::Degraded);
    assert_eq!(outcome.result.cells, expected.cells);
}

#[tokio::test]
async fn nearby_tower_shades_some_cells() {
    let (lon, lat) = (0.0, 0.0);
    let polygon = l_shaped_polygon(lon, lat, 90.0);
    // tall tower in the notch of the L, inside the fetched bounding box
    let tower = building_at(lon, lat, 70.0, 70.0, "80 m");
    let pipeline = AnalysisPipeline::new(
        daytime_config(10),
        Arc::new(StaticProvider::new(vec![tower])),
    )
    .unwrap();

    let result = pipeline.run(polygon).await.result;
    assert_eq!(result.status(), RunStatus::Ok);
    assert!(result.cells.iter().any(|c| c.shading_fraction > 0.0));
    for cell in &result.cells {
        assert!((0.0..=1.0).contains(&cell.shading_fraction));
        assert!((0.0..=1.0).contains(&cell.score));
        assert_eq!(cell.classification, Classification::from_score(cell.score));
    }
}

#[test]
fn clipped_cells_stay_inside_and_cover_the_polygon() {
    let polygon = l_shaped_polygon(8.5, 47.3, 90.0);
    let polygon_area = polygon.unsigned_area();

    for cell_size in [5, 10, 13, 20] {
        let result = compute_result(&daytime_config(cell_size), 1, &polygon, &[], RunStatus::Ok);
        assert!(!result.cells.is_empty());

        let mut total = 0.0;
        for cell in &result.cells {
            let area = cell.geometry.unsigned_area();
            let inside = cell
                .geometry
                .intersection(&geo_types::MultiPolygon(vec![polygon.clone()]))
                .unsigned_area();
            assert!(
                (area - inside).abs() <= area * 1e-6,
                "cell {} leaks outside the polygon at {} m",
                cell.id,
                cell_size
            );
            total += area;
        }

        let ratio = total / polygon_area;
        assert!(ratio <= 1.0 + 1e-9, "ratio {} at {} m", ratio, cell_size);
        assert!(ratio > 1.0 - 1e-6, "ratio {} at {} m", ratio, cell_size);
    }
}

#[test]
fn identical_inputs_serialize_identically() {
    let (lon, lat) = (8.5, 47.3);
    let polygon = l_shaped_polygon(lon, lat, 80.0);
    let buildings = vec![
        building_at(lon, lat, -20.0, 40.0, "25"),
        building_at(lon, lat, 100.0, 10.0, "12m"),
        building_at(lon, lat, 40.0, -30.0, "40"),
    ];
    let mut config = daytime_config(8);
    config.parallel_threshold = 0;

    let first = compute_result(&config, 1, &polygon, &buildings, RunStatus::Ok);
    let second = compute_result(&config, 1, &polygon, &buildings, RunStatus::Ok);

    assert_eq!(
        to_geojson_string(&first).unwrap(),
        to_geojson_string(&second).unwrap()
    );
    assert_eq!(first.occlusion, second.occlusion);
}

#[tokio::test]
async fn degenerate_polygon_yields_empty_result() {
    let line = geo_types::Polygon::new(
        geo_types::LineString::from(vec![(0.0, 0.0), (0.001, 0.0), (0.0, 0.0)]),
        vec![],
    );
    let pipeline =
        AnalysisPipeline::new(daytime_config(10), Arc::new(StaticProvider::empty())).unwrap();

    let outcome = pipeline.run(line).await;
    assert!(outcome.published);
    assert!(outcome.result.is_empty());
    assert_eq!(outcome.result.metadata.sample_count, 0);
}

#[test]
fn metadata_reports_area_and_centroid() {
    let polygon = square_polygon(0.0, 0.0, 100.0);
    let result = compute_result(&daytime_config(10), 4, &polygon, &[], RunStatus::Ok);

    let area = result.metadata.area_square_meters;
    assert!((area - 10_000.0).abs() < 50.0, "area {}", area);

    let [cx, cy] = result.metadata.centroid.unwrap();
    let bbox = BoundingBox::of_polygon(&polygon).unwrap();
    assert!((cx - (bbox.min_lon + bbox.max_lon) / 2.0).abs() < 1e-12);
    assert!((cy - (bbox.min_lat + bbox.max_lat) / 2.0).abs() < 1e-12);
    assert_eq!(result.metadata.version, 4);
}
