// error.rs

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, querying or exporting feature collections.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("KML parse error: {0}")]
    Kml(String),

    #[error("KMZ archive error: {0}")]
    Kmz(#[from] zip::result::ZipError),

    #[error("KMZ archive {} contains no .kml document", .0.display())]
    EmptyArchive(PathBuf),

    #[error("GeoJSON parse error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("plot error: {0}")]
    Plot(String),

    #[error("unsupported input format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("coordinates out of valid range: lat {lat}, lon {lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("could not parse coordinates from '{0}'")]
    UnparsableCoordinates(String),

    #[error("search radius must be a positive number of kilometres, got {0}")]
    InvalidRadius(f64),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

impl MapperError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MapperError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
