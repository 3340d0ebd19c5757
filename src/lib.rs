//! Solar-potential grid analysis.
//!
//! An installation-area polygon is tiled into square cells, each cell is
//! clipped to the polygon, and every cell centroid is tested against a small
//! set of sun positions for obstruction by nearby building footprints. The
//! blocked share of samples gives a shading fraction, a score and a
//! Low/Medium/High class per cell.
//!
//! [`pipeline::AnalysisPipeline`] ties the stages together for each polygon
//! draw or edit and publishes results through a version register so only the
//! newest run's result is ever visible.

pub mod config;
pub mod geojson_io;
pub mod grid;
pub mod pipeline;
pub mod provider;
pub mod shadow_engine;
pub mod spatial_index;
pub mod sun_position;
pub mod types;

pub use config::{AnalysisConfig, SunSamplingConfig};
pub use pipeline::{
    run_trigger_loop, AnalysisPipeline, ChannelPolygonSource, PolygonEvent, PolygonSource,
    ResultRegister, RunOutcome,
};
pub use provider::{BuildingProvider, GeoJsonFileProvider, StaticProvider};
pub use types::{
    AnalysisError, AnalysisResult, BoundingBox, BuildingFootprint, CellAnalysis, Classification,
    FootprintProperties, RunStatus, SunSample,
};
