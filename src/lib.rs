//! Find the KML features around a location.
//!
//! A master KML/KMZ (or GeoJSON) file is parsed into a [`features::FeatureCollection`];
//! [`nearby::find_nearby`] ranks the features whose geometry meets a search disc
//! around a query point. The terminal dashboard in [`app`]/[`ui`] and the
//! subcommands of the binary are thin layers over these two steps.

pub mod app;
pub mod cache;
pub mod config;
pub mod coords;
pub mod error;
pub mod event;
pub mod export;
pub mod features;
pub mod loader;
pub mod nearby;
pub mod plot;
pub mod ui;

pub use error::{MapperError, Result};
pub use features::{Feature, FeatureCollection};
pub use nearby::{DistanceModel, NearbyFeature, QueryContext, find_nearby};
