// export.rs
//
// Tabular input and output: ranked result tables to CSV, GeoJSON or KML,
// batch query points in, batch summaries out.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use geojson::JsonObject;
use kml::types::{Element, Placemark};
use kml::{Kml, KmlDocument, KmlWriter};
use serde_json::json;
use tracing::info;

use crate::coords::QueryPoint;
use crate::error::{MapperError, Result};
use crate::features::{FeatureCollection, geometry_type_name};
use crate::nearby::{BatchResult, NearbyFeature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Csv,
    Geojson,
    Kml,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Geojson => "geojson",
            ExportFormat::Kml => "kml",
        }
    }
}

const FIXED_COLUMNS: [&str; 7] = [
    "name",
    "distance_m",
    "folder",
    "geometry_type",
    "lat",
    "lon",
    "description",
];

/// One extra CSV column: the attribute key it reads and its header.
struct AttributeColumn<'a> {
    key: &'a str,
    header: String,
}

/// Attribute keys used by any of the ranked features, sorted. A key that
/// collides with a fixed column is written as `attr_<key>`.
fn attribute_columns<'a>(
    collection: &'a FeatureCollection,
    results: &[NearbyFeature],
) -> Vec<AttributeColumn<'a>> {
    let keys: BTreeSet<&str> = results
        .iter()
        .flat_map(|r| collection.features[r.index].attributes.keys())
        .map(String::as_str)
        .collect();
    let mut taken: BTreeSet<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    taken.extend(keys.iter().map(|k| k.to_string()));
    keys.into_iter()
        .map(|key| {
            let header = if FIXED_COLUMNS.contains(&key) {
                let mut header = format!("attr_{}", key);
                while taken.contains(&header) {
                    header.insert_str(0, "attr_");
                }
                taken.insert(header.clone());
                header
            } else {
                key.to_string()
            };
            AttributeColumn { key, header }
        })
        .collect()
}

/// Writes the ranked table: fixed columns first, then one column per
/// attribute key. Rows keep the ranking order.
pub fn write_csv<W: Write>(
    writer: W,
    collection: &FeatureCollection,
    results: &[NearbyFeature],
) -> Result<()> {
    let extra = attribute_columns(collection, results);
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = FIXED_COLUMNS.to_vec();
    header.extend(extra.iter().map(|c| c.header.as_str()));
    wtr.write_record(&header)?;

    for result in results {
        let feature = &collection.features[result.index];
        let (lat, lon) = match feature.representative_point() {
            Some(p) => (format!("{:.6}", p.y()), format!("{:.6}", p.x())),
            None => (String::new(), String::new()),
        };
        let mut row = vec![
            feature.display_name().to_string(),
            format!("{:.2}", result.distance_m),
            feature.folder.clone().unwrap_or_default(),
            feature
                .geometry
                .as_ref()
                .map(geometry_type_name)
                .unwrap_or_default()
                .to_string(),
            lat,
            lon,
            feature.description.clone().unwrap_or_default(),
        ];
        for column in &extra {
            row.push(feature.attributes.get(column.key).cloned().unwrap_or_default());
        }
        wtr.write_record(&row)?;
    }
    wtr.flush().map_err(|e| MapperError::io("<csv>", e))?;
    Ok(())
}

/// Ranked features as a GeoJSON FeatureCollection with a `distance_m`
/// property.
pub fn to_geojson(
    collection: &FeatureCollection,
    results: &[NearbyFeature],
) -> geojson::FeatureCollection {
    let features = results
        .iter()
        .map(|result| {
            let feature = &collection.features[result.index];
            let mut properties = JsonObject::new();
            for (key, value) in &feature.attributes {
                properties.insert(key.clone(), json!(value));
            }
            properties.insert("name".into(), json!(feature.display_name()));
            properties.insert("distance_m".into(), json!(result.distance_m));
            if let Some(folder) = &feature.folder {
                properties.insert("folder".into(), json!(folder));
            }
            if let Some(description) = &feature.description {
                properties.insert("description".into(), json!(description));
            }
            geojson::Feature {
                bbox: None,
                geometry: feature
                    .geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn kml_data(name: &str, value: &str) -> Element {
    Element {
        name: "Data".into(),
        attrs: HashMap::from([("name".to_string(), name.to_string())]),
        content: None,
        children: vec![Element {
            name: "value".into(),
            content: Some(value.to_string()),
            ..Element::default()
        }],
    }
}

/// Ranked features as a KML document, one Placemark each. `distance_m`,
/// `rank`, the folder path and the feature attributes go into ExtendedData.
pub fn to_kml(collection: &FeatureCollection, results: &[NearbyFeature]) -> Kml<f64> {
    let placemarks = results
        .iter()
        .enumerate()
        .map(|(rank, result)| {
            let feature = &collection.features[result.index];
            let mut data = vec![
                kml_data("distance_m", &format!("{:.2}", result.distance_m)),
                kml_data("rank", &(rank + 1).to_string()),
            ];
            if let Some(folder) = &feature.folder {
                data.push(kml_data("folder", folder));
            }
            data.extend(
                feature
                    .attributes
                    .iter()
                    .filter(|(key, _)| !matches!(key.as_str(), "distance_m" | "rank" | "folder"))
                    .map(|(key, value)| kml_data(key, value)),
            );
            Kml::Placemark(Placemark {
                name: Some(feature.display_name().to_string()),
                description: feature.description.clone(),
                geometry: feature.geometry.clone().map(kml::types::Geometry::from),
                children: vec![Element {
                    name: "ExtendedData".into(),
                    children: data,
                    ..Element::default()
                }],
                ..Placemark::default()
            })
        })
        .collect();
    Kml::KmlDocument(KmlDocument {
        attrs: HashMap::from([(
            "xmlns".to_string(),
            "http://www.opengis.net/kml/2.2".to_string(),
        )]),
        elements: vec![Kml::Document {
            attrs: HashMap::new(),
            elements: placemarks,
        }],
        ..KmlDocument::default()
    })
}

pub fn write_kml<W: Write>(
    mut writer: W,
    collection: &FeatureCollection,
    results: &[NearbyFeature],
) -> Result<()> {
    writer
        .write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")
        .map_err(|e| MapperError::io("<kml>", e))?;
    KmlWriter::from_writer(&mut writer)
        .write(&to_kml(collection, results))
        .map_err(|e| MapperError::Kml(e.to_string()))?;
    writer.flush().map_err(|e| MapperError::io("<kml>", e))?;
    Ok(())
}

/// Writes the result table to `path` in the requested format.
pub fn export_results(
    path: &Path,
    format: ExportFormat,
    collection: &FeatureCollection,
    results: &[NearbyFeature],
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MapperError::io(parent, e))?;
    }
    match format {
        ExportFormat::Csv => {
            let file = fs::File::create(path).map_err(|e| MapperError::io(path, e))?;
            write_csv(file, collection, results)?;
        }
        ExportFormat::Geojson => {
            let text = geojson::GeoJson::from(to_geojson(collection, results)).to_string();
            fs::write(path, text).map_err(|e| MapperError::io(path, e))?;
        }
        ExportFormat::Kml => {
            let file = fs::File::create(path).map_err(|e| MapperError::io(path, e))?;
            write_kml(io::BufWriter::new(file), collection, results)?;
        }
    }
    info!(path = %path.display(), rows = results.len(), ?format, "exported results");
    Ok(())
}

/// Timestamped export path inside `dir`.
pub fn default_export_path(dir: &Path, stem: &str, format: ExportFormat) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("{}_{}.{}", stem, stamp, format.extension()))
}

/// Reads query locations from CSV. Latitude and longitude columns are found
/// by header name (`lat`/`latitude`, `lon`/`lng`/`longitude`), falling back to
/// the first two columns. Rows that do not parse or are out of range fail the
/// whole read.
pub fn read_points_csv(path: &Path) -> Result<Vec<QueryPoint>> {
    if !path.exists() {
        return Err(MapperError::FileNotFound(path.to_path_buf()));
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = rdr.headers()?.clone();
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.contains(&h.to_ascii_lowercase().as_str()))
    };
    let lat_index = find(&["lat", "latitude"]).unwrap_or(0);
    let lon_index = find(&["lon", "lng", "long", "longitude"]).unwrap_or(1);

    let mut points = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("");
        let text = format!("{},{}", field(lat_index), field(lon_index));
        points.push(crate::coords::parse_lat_lon(&text)?);
    }
    Ok(points)
}

pub fn write_batch_csv<W: Write>(writer: W, results: &[BatchResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for result in results {
        wtr.serialize(result)?;
    }
    wtr.flush().map_err(|e| MapperError::io("<csv>", e))?;
    Ok(())
}
