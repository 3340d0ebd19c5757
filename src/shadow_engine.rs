use crate::grid::meters_to_degrees;
use crate::spatial_index::SpatialIndex;
use crate::types::{BoundingBox, CellAnalysis, Classification, ClippedCell, SunSample};
use geo::HaversineDistance;
use geo_types::Point;
use ndarray::Array2;
use rayon::prelude::*;

/// Decides whether any nearby footprint hides the sun from a point.
pub struct ShadowEvaluator<'a> {
    index: &'a SpatialIndex,
    max_distance: f64,
    meters_per_degree: f64,
}

impl<'a> ShadowEvaluator<'a> {
    pub fn new(index: &'a SpatialIndex, max_distance: f64, meters_per_degree: f64) -> Self {
        Self {
            index,
            max_distance,
            meters_per_degree,
        }
    }

    /// True when the sun is at or below the horizon, or when a footprint
    /// closer than the search radius is taller than `tan(altitude) * distance`.
    pub fn is_blocked(&self, centroid: Point<f64>, sun: &SunSample) -> bool {
        if sun.altitude <= 0.0 {
            return true;
        }

        let query = self.query_box(centroid);
        let required_per_meter = sun.altitude.tan();

        self.index.query(&query).any(|building| {
            let distance = centroid.haversine_distance(&building.centroid);
            distance < self.max_distance && building.height > required_per_meter * distance
        })
    }

    fn query_box(&self, centroid: Point<f64>) -> BoundingBox {
        let (dlon, dlat) = meters_to_degrees(self.max_distance, centroid.y(), self.meters_per_degree);
        BoundingBox::new(
            centroid.x() - dlon,
            centroid.y() - dlat,
            centroid.x() + dlon,
            centroid.y() + dlat,
        )
    }
}

/// Turns per-sample occlusion into a shading fraction, score and class.
pub struct ScoreAggregator<'a> {
    evaluator: ShadowEvaluator<'a>,
    samples: &'a [SunSample],
    /// Reserved multiplier, fixed at 1.0.
    usable_fraction: f64,
    /// Reserved multiplier, fixed at 1.0.
    irradiance_factor: f64,
}

impl<'a> ScoreAggregator<'a> {
    pub fn new(evaluator: ShadowEvaluator<'a>, samples: &'a [SunSample]) -> Self {
        Self {
            evaluator,
            samples,
            usable_fraction: 1.0,
            irradiance_factor: 1.0,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Blocked flag (1 or 0) for every sun sample, in sample order.
    pub fn occlusion_row(&self, centroid: Point<f64>) -> Vec<u8> {
        self.samples
            .iter()
            .map(|sun| u8::from(self.evaluator.is_blocked(centroid, sun)))
            .collect()
    }

    pub fn score_from_occlusion(&self, cell: &ClippedCell, occlusion: &[u8]) -> CellAnalysis {
        let shading_fraction = if occlusion.is_empty() {
            0.0
        } else {
            let blocked = occlusion.iter().filter(|&&b| b != 0).count();
            blocked as f64 / occlusion.len() as f64
        }
        .clamp(0.0, 1.0);

        let score = ((1.0 - shading_fraction) * self.usable_fraction * self.irradiance_factor)
            .clamp(0.0, 1.0);

        CellAnalysis {
            id: cell.id,
            score,
            shading_fraction,
            classification: Classification::from_score(score),
            geometry: cell.geometry.clone(),
        }
    }

    pub fn aggregate(&self, cell: &ClippedCell) -> (CellAnalysis, Vec<u8>) {
        let occlusion = self.occlusion_row(cell.centroid);
        (self.score_from_occlusion(cell, &occlusion), occlusion)
    }

    /// Scores every cell, keeping input order. Cells are independent so
    /// large batches go through rayon; small ones stay on this thread.
    pub fn aggregate_all(
        &self,
        cells: &[ClippedCell],
        parallel_threshold: usize,
    ) -> (Vec<CellAnalysis>, Array2<u8>) {
        let scored: Vec<(CellAnalysis, Vec<u8>)> = if cells.len() >= parallel_threshold {
            cells.par_iter().map(|cell| self.aggregate(cell)).collect()
        } else {
            cells.iter().map(|cell| self.aggregate(cell)).collect()
        };

        let n_samples = self.samples.len();
        let mut occlusion = Array2::<u8>::zeros((scored.len(), n_samples));
        let mut analyses = Vec::with_capacity(scored.len());
        for (row, (analysis, flags)) in scored.into_iter().enumerate() {
            for (col, flag) in flags.into_iter().enumerate() {
                occlusion[[row, col]] = flag;
            }
            analyses.push(analysis);
        }

        (analyses, occlusion)
    }
}
