use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use solar_grid::geojson_io::{parse_polygon, read_polygon, write_csv, write_geojson};
use solar_grid::{
    run_trigger_loop, AnalysisConfig, AnalysisPipeline, AnalysisResult, BuildingProvider,
    ChannelPolygonSource, GeoJsonFileProvider, PolygonEvent, StaticProvider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "solar-grid")]
#[command(about = "Per-cell solar potential for an installation area", long_about = None)]
struct Cli {
    /// JSON analysis config (defaults to the per-user config file)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// GeoJSON FeatureCollection of building footprints
    #[arg(short, long, global = true)]
    buildings: Option<PathBuf>,

    /// Grid cell size in meters (5-20), overrides the config
    #[arg(long, global = true)]
    cell_size: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyzes one polygon
    Analyze {
        /// Polygon as GeoJSON or a bare [[lon, lat], ...] ring
        #[arg(short, long)]
        polygon: PathBuf,

        /// Output GeoJSON path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write per-sample blocked flags as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Replays a JSON list of draw/edit/delete events and writes the final overlay
    Replay {
        #[arg(short, long)]
        events: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum EventRecord {
    Drawn { polygon: serde_json::Value },
    Edited { polygon: serde_json::Value },
    Deleted,
}

/// `RUST_LOG`-style directives, or `info` when unset or unparsable.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_logging() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    FmtSubscriber::builder()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_target(true)
        .init();
}

fn build_pipeline(cli: &Cli) -> anyhow::Result<AnalysisPipeline> {
    let mut config = AnalysisConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load analysis config")?;
    if let Some(cell_size) = cli.cell_size {
        config = config.with_cell_size(cell_size);
    }

    let provider: Arc<dyn BuildingProvider> = match &cli.buildings {
        Some(path) => Arc::new(GeoJsonFileProvider::new(path)),
        None => Arc::new(StaticProvider::empty()),
    };

    AnalysisPipeline::new(config, provider).context("Invalid analysis config")
}

fn default_output_path() -> anyhow::Result<PathBuf> {
    let output_dir = match dirs::document_dir() {
        Some(dir) => dir.join("SolarGrid_Exports"),
        None => std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join("exports"),
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    Ok(output_dir.join(format!("solar_grid_{}.geojson", timestamp)))
}

fn export(result: &AnalysisResult, output: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let path = match output {
        Some(path) => path,
        None => default_output_path()?,
    };
    write_geojson(&path, result).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn read_events(path: &Path) -> anyhow::Result<Vec<PolygonEvent>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records: Vec<EventRecord> =
        serde_json::from_str(&json).context("Failed to parse event list")?;

    records
        .into_iter()
        .map(|record| {
            Ok(match record {
                EventRecord::Drawn { polygon } => {
                    PolygonEvent::Drawn(parse_polygon(&polygon.to_string())?)
                }
                EventRecord::Edited { polygon } => {
                    PolygonEvent::Edited(parse_polygon(&polygon.to_string())?)
                }
                EventRecord::Deleted => PolygonEvent::Deleted,
            })
        })
        .collect::<Result<Vec<_>, solar_grid::AnalysisError>>()
        .context("Failed to parse event polygon")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let pipeline = build_pipeline(&cli)?;

    match cli.command {
        Commands::Analyze {
            polygon,
            output,
            csv,
        } => {
            let polygon = read_polygon(&polygon)
                .with_context(|| format!("Failed to read polygon {}", polygon.display()))?;

            let outcome = pipeline.run(polygon).await;
            let result = &outcome.result;
            let summary = result.metadata.summary;
            info!(
                "{} cells ({} high, {} medium, {} low), status {:?}",
                result.cells.len(),
                summary.high,
                summary.medium,
                summary.low,
                result.status()
            );

            let path = export(result, output)?;
            println!("GeoJSON exported to: {}", path.display());

            if let Some(csv) = csv {
                write_csv(&csv, result)
                    .with_context(|| format!("Failed to write {}", csv.display()))?;
                println!("CSV exported to: {}", csv.display());
            }
        }
        Commands::Replay { events, output } => {
            let events = read_events(&events)?;
            if events.is_empty() {
                bail!("Event list is empty");
            }

            let pipeline = Arc::new(pipeline);
            let register = pipeline.register();
            let (sender, source) = ChannelPolygonSource::channel(events.len());

            let pb = ProgressBar::new(events.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs")?,
            );

            let deletions = events
                .iter()
                .filter(|e| matches!(e, PolygonEvent::Deleted))
                .count();
            pb.inc(deletions as u64);

            for event in events {
                sender.send(event).await.context("Event channel closed")?;
            }
            drop(sender);

            let summary = run_trigger_loop(pipeline, source, |_| pb.inc(1)).await;
            pb.finish_with_message("Replay complete");
            info!(
                "{} runs, {} published, {} superseded, {} deletions",
                summary.runs, summary.published, summary.discarded, summary.deletions
            );

            match register.current() {
                Some(published) => {
                    let path = export(&published.result, output)?;
                    println!("GeoJSON exported to: {} (v{})", path.display(), published.version);
                }
                None => println!("Polygon was deleted, nothing to export"),
            }
        }
    }

    Ok(())
}
