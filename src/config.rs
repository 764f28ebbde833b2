use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::coords::Hemisphere;
use crate::export::ExportFormat;
use crate::nearby::{DEFAULT_INDEX_THRESHOLD, DistanceModel};

/// `kml-nearby-mapper` - find the KML features around a location.
///
/// Loads a KML, KMZ or GeoJSON master file and ranks the features that lie
/// within a search radius of a point, either interactively in the terminal
/// or through one-shot subcommands.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the master KML/KMZ (or GeoJSON) file.
    #[arg(long, env = "KML_MASTER_PATH", default_value = "data/master.kml", global = true)]
    pub kml: PathBuf,

    /// Directory where exports, plots and the TUI log file are written.
    #[arg(long, env = "MAPPER_OUTPUT_DIR", default_value = "output", global = true)]
    pub output_dir: PathBuf,

    /// How long a parsed master file is reused before it is read again.
    #[arg(long, env = "MAPPER_CACHE_TTL_SECS", default_value_t = 3600, global = true)]
    pub cache_ttl_secs: u64,

    /// Collections with at least this many features are queried through an
    /// R-tree index.
    #[arg(long, default_value_t = DEFAULT_INDEX_THRESHOLD, global = true)]
    pub index_threshold: usize,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Interactive dashboard (default).
    Tui(TuiArgs),
    /// Rank the features around one location.
    Query(QueryArgs),
    /// Run the same query for every location in a CSV file.
    Batch(BatchArgs),
    /// Summarise the master file and its data quality.
    Info,
    /// Render the features around a location to a PNG.
    Plot(PlotArgs),
    /// Convert degrees/minutes/seconds to decimal degrees.
    Dms(DmsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TuiArgs {
    /// Initial latitude shown in the query form.
    #[arg(long, default_value_t = -6.2, allow_negative_numbers = true)]
    pub lat: f64,

    /// Initial longitude shown in the query form.
    #[arg(long, default_value_t = 106.816666, allow_negative_numbers = true)]
    pub lon: f64,

    /// Initial search radius in kilometres (1-50).
    #[arg(long, default_value_t = 5.0)]
    pub radius_km: f64,
}

impl Default for TuiArgs {
    fn default() -> Self {
        TuiArgs {
            lat: -6.2,
            lon: 106.816666,
            radius_km: 5.0,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    /// Search radius in kilometres.
    #[arg(long, default_value_t = 5.0)]
    pub radius_km: f64,

    #[arg(long, value_enum, default_value_t = DistanceModel::Planar)]
    pub model: DistanceModel,

    /// Only consider features in these folders (repeatable).
    #[arg(long = "folder")]
    pub folders: Vec<String>,

    /// Write the ranked table to this file.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    pub format: ExportFormat,
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// CSV file with latitude/longitude columns.
    #[arg(long)]
    pub points: PathBuf,

    #[arg(long, default_value_t = 5.0)]
    pub radius_km: f64,

    #[arg(long, value_enum, default_value_t = DistanceModel::Planar)]
    pub model: DistanceModel,

    /// Where to write the batch summary; defaults to a file in the output dir.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PlotArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    #[arg(long, allow_negative_numbers = true)]
    pub lon: f64,

    #[arg(long, default_value_t = 5.0)]
    pub radius_km: f64,

    #[arg(long, value_enum, default_value_t = DistanceModel::Planar)]
    pub model: DistanceModel,

    /// Only highlight features in these folders (repeatable).
    #[arg(long = "folder")]
    pub folders: Vec<String>,

    /// PNG file name, relative to the output dir.
    #[arg(long, default_value = "nearby_plot.png")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct DmsArgs {
    #[arg(long)]
    pub degrees: f64,

    #[arg(long, default_value_t = 0.0)]
    pub minutes: f64,

    #[arg(long, default_value_t = 0.0)]
    pub seconds: f64,

    #[arg(long, value_enum)]
    pub direction: Hemisphere,
}
