use crate::config::AnalysisConfig;
use crate::grid::{distinct_vertex_count, geodesic_area, vertex_centroid, GridBuilder, PolygonClipper};
use crate::provider::BuildingProvider;
use crate::shadow_engine::{ScoreAggregator, ShadowEvaluator};
use crate::spatial_index::{HeightRules, SpatialIndex};
use crate::sun_position::SunSampler;
use crate::types::*;
use async_trait::async_trait;
use geo_types::Polygon;
use ndarray::Array2;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A result together with the version of the run that produced it.
#[derive(Debug, Clone)]
pub struct PublishedResult {
    pub version: u64,
    pub result: Arc<AnalysisResult>,
}

/// Last-published-version register.
///
/// Versions are issued in increasing order; a publish is accepted only from
/// the latest issued version, so a slow superseded run can finish last without
/// replacing newer state.
#[derive(Debug, Default)]
pub struct ResultRegister {
    latest: AtomicU64,
    published: RwLock<Option<PublishedResult>>,
}

impl ResultRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_version(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest_version(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Swaps in `result` if `version` is still the latest issued.
    pub fn publish(&self, version: u64, result: Arc<AnalysisResult>) -> bool {
        let mut slot = self.published.write();
        if version != self.latest.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(PublishedResult { version, result });
        true
    }

    /// Drops the published result and supersedes every in-flight run.
    pub fn discard(&self) -> u64 {
        let version = self.issue_version();
        *self.published.write() = None;
        version
    }

    pub fn current(&self) -> Option<PublishedResult> {
        self.published.read().clone()
    }

    pub fn current_version(&self) -> Option<u64> {
        self.published.read().as_ref().map(|p| p.version)
    }

    /// The published result if it is newer than what the caller displays.
    pub fn newer_than(&self, displayed: Option<u64>) -> Option<PublishedResult> {
        self.current()
            .filter(|p| displayed.map_or(true, |shown| p.version > shown))
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub version: u64,
    pub published: bool,
    pub result: Arc<AnalysisResult>,
}

/// Runs the full analysis for each polygon draw or edit.
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    provider: Arc<dyn BuildingProvider>,
    register: Arc<ResultRegister>,
    pool: Arc<rayon::ThreadPool>,
}

impl AnalysisPipeline {
    pub fn new(
        config: AnalysisConfig,
        provider: Arc<dyn BuildingProvider>,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;

        let threads = config.get_worker_threads();
        debug!("Setting up rayon thread pool with {} threads", threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("solar-grid-{}", i))
            .build()
            .map_err(|e| AnalysisError::Config(format!("failed to build thread pool: {}", e)))?;

        Ok(Self {
            config,
            provider,
            register: Arc::new(ResultRegister::new()),
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn register(&self) -> Arc<ResultRegister> {
        Arc::clone(&self.register)
    }

    /// Analyzes `polygon` under a freshly issued version.
    pub async fn run(&self, polygon: Polygon<f64>) -> RunOutcome {
        let version = self.register.issue_version();
        self.run_with_version(version, polygon).await
    }

    /// The polygon was deleted: drop the overlay and outdate running work.
    pub fn discard(&self) {
        let version = self.register.discard();
        info!("Polygon deleted, result discarded (v{})", version);
    }

    pub async fn run_with_version(&self, version: u64, polygon: Polygon<f64>) -> RunOutcome {
        let cell_size = self.config.cell_size_meters;
        info!("Starting analysis run v{} ({} m cells)", version, cell_size);

        let bbox = match usable_bbox(&polygon) {
            Some(bbox) => bbox,
            None => {
                warn!("Run v{}: polygon is degenerate, returning no cells", version);
                let result = AnalysisResult::empty(version, cell_size, RunStatus::Ok);
                return self.finish(version, result);
            }
        };

        let (footprints, status) = match self.provider.fetch(bbox).await {
            Ok(footprints) => {
                info!("Run v{}: fetched {} building footprints", version, footprints.len());
                (footprints, RunStatus::Ok)
            }
            Err(e) => {
                warn!("Run v{}: footprint fetch failed, continuing without buildings: {}", version, e);
                (Vec::new(), RunStatus::Degraded)
            }
        };

        let config = self.config.clone();
        let pool = Arc::clone(&self.pool);
        let computed = tokio::task::spawn_blocking(move || {
            pool.install(|| compute_result(&config, version, &polygon, &footprints, status))
        })
        .await;

        let result = match computed {
            Ok(result) => result,
            Err(e) => {
                error!("Run v{}: analysis task failed: {}", version, e);
                AnalysisResult::empty(version, cell_size, RunStatus::Degraded)
            }
        };

        self.finish(version, result)
    }

    fn finish(&self, version: u64, result: AnalysisResult) -> RunOutcome {
        let result = Arc::new(result);
        let published = self.register.publish(version, Arc::clone(&result));
        if published {
            info!(
                "Run v{}: published {} cells ({:?})",
                version,
                result.cells.len(),
                result.status()
            );
        } else {
            debug!(
                "Run v{}: superseded by v{}, result discarded",
                version,
                self.register.latest_version()
            );
        }
        RunOutcome {
            version,
            published,
            result,
        }
    }
}

fn usable_bbox(polygon: &Polygon<f64>) -> Option<BoundingBox> {
    if distinct_vertex_count(polygon) < 3 {
        return None;
    }
    BoundingBox::of_polygon(polygon)
}

/// Synchronous part of a run: index, grid, clip, sun samples, scores.
///
/// Deterministic for equal inputs. Cell scoring uses the current rayon pool.
pub fn compute_result(
    config: &AnalysisConfig,
    version: u64,
    polygon: &Polygon<f64>,
    footprints: &[BuildingFootprint],
    status: RunStatus,
) -> AnalysisResult {
    let cell_size = config.cell_size_meters;
    let (bbox, centroid) = match (usable_bbox(polygon), vertex_centroid(polygon)) {
        (Some(bbox), Some(centroid)) => (bbox, centroid),
        _ => return AnalysisResult::empty(version, cell_size, status),
    };

    let rules = HeightRules {
        default_height: config.default_building_height,
        meters_per_level: config.meters_per_level,
    };
    let index = SpatialIndex::bulk_load(footprints, &rules);

    let cells = match GridBuilder::new(bbox, cell_size as f64) {
        Some(grid) => {
            let clipped = PolygonClipper::new(polygon).clip_grid(&grid);
            debug!(
                "Run v{}: {} of {} grid cells overlap the polygon",
                version,
                clipped.len(),
                grid.len()
            );
            clipped
        }
        None => Vec::new(),
    };

    let samples = match SunSampler::new(config.sun.clone()).sample(centroid) {
        Ok(samples) => samples,
        Err(e) => {
            error!("Run v{}: sun sampling failed: {}", version, e);
            return AnalysisResult::empty(version, cell_size, status);
        }
    };

    let evaluator = ShadowEvaluator::new(
        &index,
        config.max_search_radius_meters,
        config.meters_per_degree,
    );
    let aggregator = ScoreAggregator::new(evaluator, &samples);
    let (analyses, occlusion): (Vec<CellAnalysis>, Array2<u8>) =
        aggregator.aggregate_all(&cells, config.parallel_threshold);

    let summary = ClassSummary::from_cells(&analyses);
    let sample_count = samples.len();

    AnalysisResult {
        cells: analyses,
        samples,
        occlusion,
        metadata: RunMetadata {
            version,
            cell_size_meters: cell_size,
            sample_count,
            status,
            area_square_meters: geodesic_area(polygon).round(),
            centroid: Some([centroid.x(), centroid.y()]),
            summary,
        },
    }
}

/// A change to the installation-area polygon.
#[derive(Debug, Clone, PartialEq)]
pub enum PolygonEvent {
    Drawn(Polygon<f64>),
    Edited(Polygon<f64>),
    Deleted,
}

/// Emits polygon changes until the drawing surface goes away.
///
/// `next_event` must be cancel safe: the trigger loop drops a pending call
/// whenever a run finishes first.
#[async_trait]
pub trait PolygonSource: Send {
    async fn next_event(&mut self) -> Option<PolygonEvent>;
}

pub struct ChannelPolygonSource {
    receiver: mpsc::Receiver<PolygonEvent>,
}

impl ChannelPolygonSource {
    pub fn channel(buffer: usize) -> (mpsc::Sender<PolygonEvent>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, Self { receiver })
    }
}

#[async_trait]
impl PolygonSource for ChannelPolygonSource {
    async fn next_event(&mut self) -> Option<PolygonEvent> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSummary {
    pub runs: usize,
    pub published: usize,
    pub discarded: usize,
    pub deletions: usize,
}

/// Starts one run per draw or edit without cancelling earlier runs, and
/// discards the overlay on delete. Versions are issued here, in event order,
/// so the newest event wins regardless of which run finishes last. Finished
/// runs are reported as they complete, while the source is still open.
pub async fn run_trigger_loop<S, F>(
    pipeline: Arc<AnalysisPipeline>,
    mut source: S,
    mut on_outcome: F,
) -> TriggerSummary
where
    S: PolygonSource,
    F: FnMut(&RunOutcome),
{
    let mut summary = TriggerSummary::default();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            event = source.next_event() => match event {
                Some(PolygonEvent::Drawn(polygon)) | Some(PolygonEvent::Edited(polygon)) => {
                    let version = pipeline.register.issue_version();
                    let pipeline = Arc::clone(&pipeline);
                    tasks.spawn(async move { pipeline.run_with_version(version, polygon).await });
                    summary.runs += 1;
                }
                Some(PolygonEvent::Deleted) => {
                    pipeline.discard();
                    summary.deletions += 1;
                }
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                record(joined, &mut summary, &mut on_outcome);
            }
        }
    }

    debug!("Polygon source closed, waiting for {} runs", tasks.len());
    while let Some(joined) = tasks.join_next().await {
        record(joined, &mut summary, &mut on_outcome);
    }

    summary
}

fn record<F>(
    joined: Result<RunOutcome, tokio::task::JoinError>,
    summary: &mut TriggerSummary,
    on_outcome: &mut F,
) where
    F: FnMut(&RunOutcome),
{
    match joined {
        Ok(outcome) => {
            if outcome.published {
                summary.published += 1;
            } else {
                summary.discarded += 1;
            }
            on_outcome(&outcome);
        }
        Err(e) => {
            error!("Analysis run panicked: {}", e);
            summary.discarded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_result(version: u64) -> Arc<AnalysisResult> {
        Arc::new(AnalysisResult::empty(version, 10, RunStatus::Ok))
    }

    #[test]
    fn versions_increase() {
        let register = ResultRegister::new();
        assert_eq!(register.latest_version(), 0);
        assert_eq!(register.issue_version(), 1);
        assert_eq!(register.issue_version(), 2);
        assert_eq!(register.latest_version(), 2);
    }

    #[test]
    fn stale_publish_is_rejected() {
        let register = ResultRegister::new();
        let v1 = register.issue_version();
        let v2 = register.issue_version();

        assert!(register.publish(v2, empty_result(v2)));
        assert!(!register.publish(v1, empty_result(v1)));
        assert_eq!(register.current_version(), Some(v2));
    }

    #[test]
    fn discard_clears_and_supersedes() {
        let register = ResultRegister::new();
        let v1 = register.issue_version();
        assert!(register.publish(v1, empty_result(v1)));

        let v2 = register.issue_version();
        register.discard();
        assert!(register.current().is_none());
        assert!(!register.publish(v2, empty_result(v2)));
    }

    #[test]
    fn consumer_sees_only_newer_results() {
        let register = ResultRegister::new();
        assert!(register.newer_than(None).is_none());

        let v1 = register.issue_version();
        register.publish(v1, empty_result(v1));
        assert_eq!(register.newer_than(None).map(|p| p.version), Some(v1));
        assert!(register.newer_than(Some(v1)).is_none());
    }
}
