// features.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use geo::{BoundingRect, Centroid, CoordsIter, GeodesicArea, Geometry, LineString, Point, Polygon};

use crate::error::{MapperError, Result};

/// Kilometres covered by one degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.0;
/// Metres covered by one degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Coarse geometry family used for type filters and map styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
    Collection,
}

impl GeometryKind {
    pub const ALL: [GeometryKind; 4] = [
        GeometryKind::Point,
        GeometryKind::Line,
        GeometryKind::Polygon,
        GeometryKind::Collection,
    ];

    pub fn of(geometry: &Geometry<f64>) -> GeometryKind {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryKind::Point,
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                GeometryKind::Line
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => GeometryKind::Polygon,
            Geometry::GeometryCollection(_) => GeometryKind::Collection,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Points",
            GeometryKind::Line => "Lines",
            GeometryKind::Polygon => "Polygons",
            GeometryKind::Collection => "Collections",
        }
    }
}

/// Name of the concrete geometry type, as reported in tables and exports.
pub fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn line_string_usable(line: &LineString<f64>) -> bool {
    line.0.len() >= 2
}

fn polygon_usable(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().0.len() >= 4 && polygon.interiors().iter().all(|ring| ring.0.len() >= 4)
}

/// Returns true when a geometry can take part in a spatial query: it has
/// coordinates, all of them finite, and every line/ring has enough vertices.
pub fn geometry_is_usable(geometry: &Geometry<f64>) -> bool {
    if geometry.coords_count() == 0 {
        return false;
    }
    if !geometry
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
    {
        return false;
    }
    match geometry {
        Geometry::LineString(line) => line_string_usable(line),
        Geometry::MultiLineString(lines) => {
            !lines.0.is_empty() && lines.0.iter().all(line_string_usable)
        }
        Geometry::Polygon(polygon) => polygon_usable(polygon),
        Geometry::MultiPolygon(polygons) => {
            !polygons.0.is_empty() && polygons.0.iter().all(polygon_usable)
        }
        Geometry::GeometryCollection(collection) => collection.0.iter().all(geometry_is_usable),
        _ => true,
    }
}

/// One placemark (or GeoJSON feature) loaded from a source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Slash-joined path of the enclosing folders, outermost first.
    pub folder: Option<String>,
    pub geometry: Option<Geometry<f64>>,
    pub attributes: BTreeMap<String, String>,
}

impl Feature {
    pub fn new(name: impl Into<String>, geometry: Geometry<f64>) -> Self {
        Feature {
            name: Some(name.into()),
            geometry: Some(geometry),
            ..Feature::default()
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or("(unnamed)")
    }

    pub fn kind(&self) -> Option<GeometryKind> {
        self.geometry.as_ref().map(GeometryKind::of)
    }

    /// The geometry, if present and usable.
    pub fn usable_geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref().filter(|g| geometry_is_usable(g))
    }

    /// A point standing in for the feature in tables: its centroid.
    pub fn representative_point(&self) -> Option<Point<f64>> {
        self.usable_geometry().and_then(|g| g.centroid())
    }

    pub fn measure(&self) -> FeatureMeasure {
        match self.usable_geometry() {
            Some(geometry) => FeatureMeasure::of(geometry),
            None => FeatureMeasure::None,
        }
    }
}

/// Size of a feature, in the unit that makes sense for its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureMeasure {
    AreaHectares(f64),
    LengthKm(f64),
    None,
}

fn planar_length_degrees(line: &LineString<f64>) -> f64 {
    line.lines().map(|segment| segment.dx().hypot(segment.dy())).sum()
}

impl FeatureMeasure {
    pub fn of(geometry: &Geometry<f64>) -> FeatureMeasure {
        match geometry {
            Geometry::Polygon(polygon) => {
                FeatureMeasure::AreaHectares(polygon.geodesic_area_unsigned() / 10_000.0)
            }
            Geometry::MultiPolygon(polygons) => {
                FeatureMeasure::AreaHectares(polygons.geodesic_area_unsigned() / 10_000.0)
            }
            Geometry::LineString(line) => {
                FeatureMeasure::LengthKm(planar_length_degrees(line) * KM_PER_DEGREE)
            }
            Geometry::MultiLineString(lines) => FeatureMeasure::LengthKm(
                lines.0.iter().map(planar_length_degrees).sum::<f64>() * KM_PER_DEGREE,
            ),
            _ => FeatureMeasure::None,
        }
    }

    pub fn describe(&self) -> Option<String> {
        match self {
            FeatureMeasure::AreaHectares(ha) => Some(format!("Area: {:.2} ha", ha)),
            FeatureMeasure::LengthKm(km) => Some(format!("Length: {:.2} km", km)),
            FeatureMeasure::None => None,
        }
    }
}

/// Ordered table of features, in source document order.
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub source: PathBuf,
    pub features: Vec<Feature>,
}

/// Share of usable geometries and named features in a collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataQuality {
    pub total_features: usize,
    pub valid_geometry_percent: f64,
    pub named_features_percent: f64,
}

impl FeatureCollection {
    pub fn new(source: impl Into<PathBuf>, features: Vec<Feature>) -> Self {
        FeatureCollection {
            source: source.into(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn folders(&self) -> BTreeSet<String> {
        self.features
            .iter()
            .filter_map(|f| f.folder.clone())
            .collect()
    }

    pub fn geometry_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for geometry in self.features.iter().filter_map(|f| f.geometry.as_ref()) {
            *counts
                .entry(geometry_type_name(geometry).to_string())
                .or_insert(0) += 1;
        }
        counts
    }

    /// [min_lon, min_lat, max_lon, max_lat] over all usable geometries.
    pub fn bbox(&self) -> Option<[f64; 4]> {
        self.features
            .iter()
            .filter_map(|f| f.usable_geometry())
            .filter_map(|g| g.bounding_rect())
            .fold(None, |acc: Option<[f64; 4]>, rect| {
                let (min, max) = (rect.min(), rect.max());
                Some(match acc {
                    None => [min.x, min.y, max.x, max.y],
                    Some(b) => [b[0].min(min.x), b[1].min(min.y), b[2].max(max.x), b[3].max(max.y)],
                })
            })
    }

    pub fn data_quality(&self) -> DataQuality {
        let total = self.features.len();
        if total == 0 {
            return DataQuality {
                total_features: 0,
                valid_geometry_percent: 0.0,
                named_features_percent: 0.0,
            };
        }
        let valid = self
            .features
            .iter()
            .filter(|f| f.usable_geometry().is_some())
            .count();
        let named = self
            .features
            .iter()
            .filter(|f| f.name.as_deref().is_some_and(|n| !n.trim().is_empty()))
            .count();
        DataQuality {
            total_features: total,
            valid_geometry_percent: valid as f64 / total as f64 * 100.0,
            named_features_percent: named as f64 / total as f64 * 100.0,
        }
    }
}

/// Summary of a loaded file shown in the info panel and the `info` command.
#[derive(Default, Clone, Debug)]
pub struct CollectionInfo {
    pub file_size_kb: u64,
    pub modified_time: String,
    pub feature_count: usize,
    pub geometry_counts: HashMap<String, usize>,
    pub bbox: Option<[f64; 4]>, // [min_lon, min_lat, max_lon, max_lat]
    pub folders: Vec<String>,
    pub quality: Option<DataQuality>,
}

impl CollectionInfo {
    pub fn gather(path: &Path, collection: &FeatureCollection) -> Result<CollectionInfo> {
        let metadata = fs::metadata(path).map_err(|e| MapperError::io(path, e))?;
        let modified_time = match metadata.modified() {
            Ok(time) => {
                let datetime: chrono::DateTime<chrono::Local> = time.into();
                format!("{}", datetime.format("%Y-%m-%d %H:%M"))
            }
            Err(_) => String::from("N/A"),
        };
        Ok(CollectionInfo {
            file_size_kb: metadata.len() / 1024,
            modified_time,
            feature_count: collection.len(),
            geometry_counts: collection.geometry_counts(),
            bbox: collection.bbox(),
            folders: collection.folders().into_iter().collect(),
            quality: Some(collection.data_quality()),
        })
    }

    /// Text lines for display, geometry counts sorted by type name.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Size: {} KB", self.file_size_kb),
            format!("Modified: {}", self.modified_time),
            format!("Features: {}", self.feature_count),
        ];
        let mut counts: Vec<_> = self.geometry_counts.iter().collect();
        counts.sort();
        for (geom_type, count) in counts {
            lines.push(format!("  {}: {}", geom_type, count));
        }
        match self.bbox {
            Some(bbox) => lines.push(format!(
                "BBox: [{:.4},{:.4},{:.4},{:.4}]",
                bbox[0], bbox[1], bbox[2], bbox[3]
            )),
            None => lines.push(String::from("BBox: Not applicable/Found")),
        }
        if !self.folders.is_empty() {
            lines.push(format!("Folders: {}", self.folders.len()));
        }
        if let Some(quality) = self.quality {
            lines.push(format!(
                "Valid geometry: {:.1}%",
                quality.valid_geometry_percent
            ));
            lines.push(format!(
                "Named features: {:.1}%",
                quality.named_features_percent
            ));
        }
        lines
    }
}
