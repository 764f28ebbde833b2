// loader.rs
//
// KML, KMZ and GeoJSON ingestion. Every format ends up as the same
// `FeatureCollection`; a placemark whose geometry cannot be converted keeps
// its attributes and gets `geometry: None`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use geojson::GeoJson;
use kml::Kml;
use kml::types::Element;
use tracing::{debug, info, warn};

use crate::error::{MapperError, Result};
use crate::features::{Feature, FeatureCollection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Kml,
    Kmz,
    GeoJson,
}

impl SourceFormat {
    fn from_extension(path: &Path) -> Option<SourceFormat> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "kml" => Some(SourceFormat::Kml),
            "kmz" => Some(SourceFormat::Kmz),
            "geojson" | "json" => Some(SourceFormat::GeoJson),
            _ => None,
        }
    }

    fn sniff(bytes: &[u8]) -> Option<SourceFormat> {
        if bytes.starts_with(b"PK") {
            return Some(SourceFormat::Kmz);
        }
        let first = bytes.iter().find(|b| !b.is_ascii_whitespace())?;
        match first {
            b'<' => Some(SourceFormat::Kml),
            b'{' => Some(SourceFormat::GeoJson),
            _ => None,
        }
    }
}

/// Loads a KML, KMZ or GeoJSON file into a feature collection.
pub fn load_features(path: &Path) -> Result<FeatureCollection> {
    if !path.exists() {
        return Err(MapperError::FileNotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|e| MapperError::io(path, e))?;
    let format = SourceFormat::from_extension(path)
        .or_else(|| SourceFormat::sniff(&bytes))
        .ok_or_else(|| MapperError::UnsupportedFormat(path.to_path_buf()))?;
    debug!(path = %path.display(), ?format, "reading feature file");

    let features = match format {
        SourceFormat::Kml => {
            let text = String::from_utf8_lossy(&bytes);
            parse_kml_str(&text)?
        }
        SourceFormat::Kmz => {
            let text = read_kmz_document(path, io::Cursor::new(bytes))?;
            parse_kml_str(&text)?
        }
        SourceFormat::GeoJson => {
            let text = String::from_utf8_lossy(&bytes);
            parse_geojson_str(&text)?
        }
    };

    let without_geometry = features.iter().filter(|f| f.geometry.is_none()).count();
    info!(
        path = %path.display(),
        features = features.len(),
        without_geometry,
        "loaded feature collection"
    );
    Ok(FeatureCollection::new(path, features))
}

/// Extracts the main KML document from a KMZ archive: `doc.kml` when present,
/// otherwise the first `.kml` entry.
fn read_kmz_document<R: io::Read + io::Seek>(path: &Path, reader: R) -> Result<String> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut chosen: Option<usize> = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let name = entry.name().to_ascii_lowercase();
        if name == "doc.kml" || name.ends_with("/doc.kml") {
            chosen = Some(i);
            break;
        }
        if chosen.is_none() && name.ends_with(".kml") {
            chosen = Some(i);
        }
    }
    let index = chosen.ok_or_else(|| MapperError::EmptyArchive(path.to_path_buf()))?;
    let mut entry = archive.by_index(index)?;
    debug!(entry = entry.name(), "extracting KML from KMZ");
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| MapperError::io(path, e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Parses KML text and flattens its placemarks into features.
pub fn parse_kml_str(text: &str) -> Result<Vec<Feature>> {
    let kml: Kml<f64> = text.parse().map_err(|e: kml::Error| MapperError::Kml(e.to_string()))?;
    let mut features = Vec::new();
    let mut folders = Vec::new();
    collect_placemarks(&kml, &mut folders, &mut features);
    Ok(features)
}

fn collect_placemarks(kml: &Kml<f64>, folders: &mut Vec<String>, out: &mut Vec<Feature>) {
    match kml {
        Kml::KmlDocument(doc) => {
            for element in &doc.elements {
                collect_placemarks(element, folders, out);
            }
        }
        Kml::Document { elements, .. } => {
            for element in elements {
                collect_placemarks(element, folders, out);
            }
        }
        Kml::Folder(folder) => {
            let name = folder
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| String::from("(unnamed folder)"));
            folders.push(name.trim().to_string());
            for element in &folder.elements {
                collect_placemarks(element, folders, out);
            }
            folders.pop();
        }
        Kml::Placemark(placemark) => {
            let geometry = match &placemark.geometry {
                Some(geometry) => match geo::Geometry::<f64>::try_from(geometry.clone()) {
                    Ok(converted) => Some(converted),
                    Err(e) => {
                        warn!(
                            placemark = placemark.name.as_deref().unwrap_or("(unnamed)"),
                            error = %e,
                            "skipping placemark geometry that failed to convert"
                        );
                        None
                    }
                },
                None => None,
            };
            let mut attributes = BTreeMap::new();
            for child in &placemark.children {
                collect_extended_data(child, &mut attributes);
            }
            out.push(Feature {
                name: clean_text(placemark.name.as_deref()),
                description: clean_text(placemark.description.as_deref()),
                folder: if folders.is_empty() {
                    None
                } else {
                    Some(folders.join("/"))
                },
                geometry,
                attributes,
            });
        }
        _ => {}
    }
}

fn clean_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

/// Reads `<Data name="..."><value>..</value></Data>` and
/// `<SimpleData name="...">..</SimpleData>` pairs out of ExtendedData.
fn collect_extended_data(element: &Element, attributes: &mut BTreeMap<String, String>) {
    match element.name.as_str() {
        "Data" => {
            if let Some(key) = element.attrs.get("name") {
                let value = element
                    .children
                    .iter()
                    .find(|c| c.name == "value")
                    .and_then(|c| c.content.clone())
                    .unwrap_or_default();
                attributes.insert(key.clone(), value.trim().to_string());
            }
        }
        "SimpleData" => {
            if let Some(key) = element.attrs.get("name") {
                let value = element.content.clone().unwrap_or_default();
                attributes.insert(key.clone(), value.trim().to_string());
            }
        }
        _ => {
            for child in &element.children {
                collect_extended_data(child, attributes);
            }
        }
    }
}

/// Parses GeoJSON text; `name` and `description` properties are promoted,
/// the rest become attributes.
pub fn parse_geojson_str(text: &str) -> Result<Vec<Feature>> {
    let geojson: GeoJson = text.parse()?;
    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .map(feature_from_geojson)
            .collect(),
        GeoJson::Feature(feature) => vec![feature_from_geojson(feature)],
        GeoJson::Geometry(geometry) => vec![Feature {
            geometry: convert_geojson_geometry(geometry),
            ..Feature::default()
        }],
    };
    Ok(features)
}

fn convert_geojson_geometry(geometry: geojson::Geometry) -> Option<geo::Geometry<f64>> {
    match geo::Geometry::<f64>::try_from(geometry.value) {
        Ok(converted) => Some(converted),
        Err(e) => {
            warn!(error = %e, "skipping GeoJSON geometry that failed to convert");
            None
        }
    }
}

fn feature_from_geojson(feature: geojson::Feature) -> Feature {
    let mut attributes = BTreeMap::new();
    if let Some(properties) = feature.properties {
        for (key, value) in properties {
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            attributes.insert(key, text);
        }
    }
    let name = attributes.remove("name");
    let description = attributes.remove("description");
    let folder = attributes.remove("folder");
    Feature {
        name: clean_text(name.as_deref()),
        description: clean_text(description.as_deref()),
        folder: clean_text(folder.as_deref()),
        geometry: feature.geometry.and_then(convert_geojson_geometry),
        attributes,
    }
}
