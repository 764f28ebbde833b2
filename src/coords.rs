// coords.rs

use std::fmt;

use geo::Point;

use crate::error::{MapperError, Result};

/// A validated query location, latitude first as users type it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryPoint {
    pub lat: f64,
    pub lon: f64,
}

impl QueryPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        validate_coordinates(lat, lon)?;
        Ok(QueryPoint { lat, lon })
    }

    /// Geometry point in x = longitude, y = latitude order.
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

impl fmt::Display for QueryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lon)
    }
}

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(MapperError::InvalidCoordinates { lat, lon });
    }
    Ok(())
}

/// Hemisphere letter of a degrees/minutes/seconds coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Hemisphere {
    N,
    S,
    E,
    W,
}

pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, direction: Hemisphere) -> f64 {
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    match direction {
        Hemisphere::S | Hemisphere::W => -decimal,
        Hemisphere::N | Hemisphere::E => decimal,
    }
}

/// Parses "lat,lon" (comma, semicolon or whitespace separated).
pub fn parse_lat_lon(text: &str) -> Result<QueryPoint> {
    let parts: Vec<&str> = text
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.len() != 2 {
        return Err(MapperError::UnparsableCoordinates(text.to_string()));
    }
    let lat = parts[0]
        .parse::<f64>()
        .map_err(|_| MapperError::UnparsableCoordinates(text.to_string()))?;
    let lon = parts[1]
        .parse::<f64>()
        .map_err(|_| MapperError::UnparsableCoordinates(text.to_string()))?;
    QueryPoint::new(lat, lon)
}
