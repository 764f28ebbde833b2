// nearby.rs
//
// The nearby-feature filter: given a collection, a query point and a radius,
// return the features whose geometry meets the search disc, nearest first.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use geo::{
    BoundingRect, Closest, ClosestPoint, CoordsIter, Distance, Euclidean, Geodesic, Geometry,
    Intersects, LineString, Point, Polygon,
};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use tracing::{debug, warn};

use crate::coords::QueryPoint;
use crate::error::{MapperError, Result};
use crate::features::{
    Feature, FeatureCollection, GeometryKind, KM_PER_DEGREE, METERS_PER_DEGREE,
};

/// Collections at least this large get an R-tree before querying.
pub const DEFAULT_INDEX_THRESHOLD: usize = 256;
/// Segments per quarter circle when approximating the search disc.
const QUADRANT_SEGMENTS: usize = 16;

/// How distances and the search disc are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DistanceModel {
    /// Degrees in the plane, 111 km per degree on both axes.
    #[default]
    Planar,
    /// Geodesic distance on the WGS84 ellipsoid to the nearest point of the
    /// geometry (nearest point picked in degree space).
    Geodesic,
}

impl DistanceModel {
    pub fn label(&self) -> &'static str {
        match self {
            DistanceModel::Planar => "planar (111 km/deg)",
            DistanceModel::Geodesic => "geodesic",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            DistanceModel::Planar => DistanceModel::Geodesic,
            DistanceModel::Geodesic => DistanceModel::Planar,
        }
    }
}

/// Restricts which features take part in a query. An empty folder set
/// means every folder; a folder also selects its sub-folders.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFilter {
    pub folders: BTreeSet<String>,
    pub kinds: BTreeSet<GeometryKind>,
}

impl Default for FeatureFilter {
    fn default() -> Self {
        FeatureFilter {
            folders: BTreeSet::new(),
            kinds: GeometryKind::ALL.into_iter().collect(),
        }
    }
}

impl FeatureFilter {
    pub fn with_folders<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.folders = folders.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind_toggled(mut self, kind: GeometryKind) -> Self {
        if !self.kinds.remove(&kind) {
            self.kinds.insert(kind);
        }
        self
    }

    pub fn shows(&self, kind: GeometryKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn accepts(&self, feature: &Feature) -> bool {
        if let Some(kind) = feature.kind() {
            if !self.kinds.contains(&kind) {
                return false;
            }
        }
        if self.folders.is_empty() {
            return true;
        }
        match feature.folder.as_deref() {
            Some(folder) => self.folders.iter().any(|selected| {
                folder == selected
                    || folder
                        .strip_prefix(selected.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }),
            None => false,
        }
    }
}

/// Everything one query needs. Built fresh for every request and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    pub point: QueryPoint,
    pub radius_km: f64,
    pub model: DistanceModel,
    pub filter: FeatureFilter,
}

impl QueryContext {
    pub fn new(point: QueryPoint, radius_km: f64) -> Result<Self> {
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(MapperError::InvalidRadius(radius_km));
        }
        Ok(QueryContext {
            point,
            radius_km,
            model: DistanceModel::Planar,
            filter: FeatureFilter::default(),
        })
    }

    pub fn with_model(mut self, model: DistanceModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_filter(mut self, filter: FeatureFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Search radius in degrees under the 111 km/degree approximation.
    pub fn degree_buffer(&self) -> f64 {
        self.radius_km / KM_PER_DEGREE
    }

    /// The query point buffered by the degree radius: a 64-gon in degree space.
    pub fn search_disc(&self) -> Polygon<f64> {
        buffer_point(self.point.to_point(), self.degree_buffer())
    }

    /// Lon/lat boxes that together contain every feature this query could
    /// match. Geodesic boxes are split at the antimeridian and span all
    /// longitudes once they reach a pole.
    fn search_envelopes(&self) -> Vec<AABB<[f64; 2]>> {
        let (lon, lat) = (self.point.lon, self.point.lat);
        match self.model {
            DistanceModel::Planar => {
                let buffer = self.degree_buffer();
                vec![AABB::from_corners(
                    [lon - buffer, lat - buffer],
                    [lon + buffer, lat + buffer],
                )]
            }
            DistanceModel::Geodesic => {
                // one degree of latitude is never shorter than 110.5 km
                let dy = self.radius_km / 110.5;
                let (south, north) = ((lat - dy).max(-90.0), (lat + dy).min(90.0));
                // meridians converge fastest at the poleward edge
                let poleward = lat.abs() + dy;
                if poleward >= 90.0 {
                    return vec![AABB::from_corners([-180.0, south], [180.0, north])];
                }
                let dx = dy / poleward.to_radians().cos();
                if dx >= 180.0 {
                    return vec![AABB::from_corners([-180.0, south], [180.0, north])];
                }
                let (west, east) = (lon - dx, lon + dx);
                if west < -180.0 {
                    vec![
                        AABB::from_corners([-180.0, south], [east, north]),
                        AABB::from_corners([west + 360.0, south], [180.0, north]),
                    ]
                } else if east > 180.0 {
                    vec![
                        AABB::from_corners([west, south], [180.0, north]),
                        AABB::from_corners([-180.0, south], [east - 360.0, north]),
                    ]
                } else {
                    vec![AABB::from_corners([west, south], [east, north])]
                }
            }
        }
    }
}

pub fn buffer_point(center: Point<f64>, radius: f64) -> Polygon<f64> {
    let segments = QUADRANT_SEGMENTS * 4;
    let ring: Vec<(f64, f64)> = (0..segments)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / segments as f64;
            (
                center.x() + radius * angle.cos(),
                center.y() + radius * angle.sin(),
            )
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// One row of the ranked result table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearbyFeature {
    /// Position of the feature in its collection.
    pub index: usize,
    pub distance_m: f64,
}

struct IndexedEnvelope {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// R-tree over feature bounding boxes. Only narrows the candidate set; the
/// exact disc test still runs on every candidate.
pub struct SpatialIndex {
    tree: RTree<IndexedEnvelope>,
}

impl SpatialIndex {
    pub fn build(collection: &FeatureCollection) -> Self {
        let items: Vec<IndexedEnvelope> = collection
            .features
            .iter()
            .enumerate()
            .filter_map(|(idx, feature)| {
                let rect = feature.usable_geometry()?.bounding_rect()?;
                Some(IndexedEnvelope {
                    idx,
                    env: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        debug!(indexed = items.len(), "built spatial index");
        SpatialIndex {
            tree: RTree::bulk_load(items),
        }
    }

    /// Builds an index only when the collection is big enough to benefit.
    pub fn build_if_large(collection: &FeatureCollection, threshold: usize) -> Option<Self> {
        (collection.len() >= threshold).then(|| SpatialIndex::build(collection))
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Feature indices whose box meets any of `envelopes`, in collection
    /// order and without duplicates.
    fn candidates(&self, envelopes: &[AABB<[f64; 2]>]) -> Vec<usize> {
        let mut found: Vec<usize> = envelopes
            .iter()
            .flat_map(|envelope| self.tree.locate_in_envelope_intersecting(envelope))
            .map(|item| item.idx)
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }
}

fn geodesic_distance_to(point: Point<f64>, geometry: &Geometry<f64>) -> f64 {
    match geometry.closest_point(&point) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => Geodesic.distance(point, p),
        Closest::Indeterminate => geometry
            .coords_iter()
            .map(|c| Geodesic.distance(point, Point::from(c)))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Distance in metres when the feature falls inside the query, `Ok(None)` when
/// it does not, `Err` when its geometry cannot be evaluated.
fn evaluate(feature: &Feature, ctx: &QueryContext, disc: &Polygon<f64>) -> Result<Option<f64>> {
    let geometry = feature
        .usable_geometry()
        .ok_or_else(|| MapperError::InvalidGeometry(feature.display_name().to_string()))?;
    let point = ctx.point.to_point();

    let distance_m = match ctx.model {
        DistanceModel::Planar => {
            if !disc.intersects(geometry) {
                return Ok(None);
            }
            Euclidean.distance(&point, geometry) * METERS_PER_DEGREE
        }
        DistanceModel::Geodesic => {
            let d = geodesic_distance_to(point, geometry);
            if d > ctx.radius_km * 1000.0 {
                return Ok(None);
            }
            d
        }
    };

    if !distance_m.is_finite() {
        return Err(MapperError::InvalidGeometry(format!(
            "{}: distance is not finite",
            feature.display_name()
        )));
    }
    Ok(Some(distance_m))
}

/// Ranks the features of `collection` that fall within the query disc.
///
/// Features without geometry, or with geometry that is empty or invalid, are
/// skipped. Output is sorted by distance ascending; equal distances keep their
/// collection order. Passing an index never changes the result.
pub fn find_nearby(
    collection: &FeatureCollection,
    ctx: &QueryContext,
    index: Option<&SpatialIndex>,
) -> Vec<NearbyFeature> {
    let disc = ctx.search_disc();
    let candidates: Vec<usize> = match index {
        Some(index) => index.candidates(&ctx.search_envelopes()),
        None => (0..collection.len()).collect(),
    };

    let mut skipped = 0usize;
    let mut results = Vec::new();
    for idx in candidates {
        let feature = &collection.features[idx];
        if feature.geometry.is_none() || !ctx.filter.accepts(feature) {
            continue;
        }
        match evaluate(feature, ctx, &disc) {
            Ok(Some(distance_m)) => results.push(NearbyFeature {
                index: idx,
                distance_m,
            }),
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                debug!(feature = idx, error = %e, "feature excluded from query");
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, "features with invalid geometry were excluded");
    }

    results.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    debug!(
        lat = ctx.point.lat,
        lon = ctx.point.lon,
        radius_km = ctx.radius_km,
        found = results.len(),
        "nearby query finished"
    );
    results
}

/// Per-location summary produced by [`batch_analysis`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub lat: f64,
    pub lon: f64,
    pub features_found: usize,
    pub closest_distance_m: Option<f64>,
}

/// Runs the same query for many locations.
pub fn batch_analysis(
    collection: &FeatureCollection,
    points: &[QueryPoint],
    radius_km: f64,
    model: DistanceModel,
    index: Option<&SpatialIndex>,
) -> Result<Vec<BatchResult>> {
    points
        .iter()
        .map(|point| {
            let ctx = QueryContext::new(*point, radius_km)?.with_model(model);
            let nearby = find_nearby(collection, &ctx, index);
            Ok(BatchResult {
                lat: point.lat,
                lon: point.lon,
                features_found: nearby.len(),
                closest_distance_m: nearby.first().map(|n| n.distance_m),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{line_string, point, polygon};

    const LAT: f64 = -6.2;
    const LON: f64 = 106.816666;

    fn query(radius_km: f64) -> QueryContext {
        QueryContext::new(QueryPoint::new(LAT, LON).unwrap(), radius_km).unwrap()
    }

    /// A point `km` kilometres due south of the query point (planar model).
    fn south(km: f64) -> Geometry<f64> {
        point!(x: LON, y: LAT - km / KM_PER_DEGREE).into()
    }

    fn mixed_collection() -> FeatureCollection {
        FeatureCollection::new(
            "mem.kml",
            vec![
                Feature::new("far point", south(30.0)),
                Feature::new("3 km", south(3.0)),
                Feature::new(
                    "crossing line",
                    line_string![(x: LON - 1.0, y: LAT + 0.02), (x: LON + 1.0, y: LAT + 0.02)]
                        .into(),
                ),
                Feature::new(
                    "block",
                    polygon![
                        (x: LON + 0.05, y: LAT - 0.05),
                        (x: LON + 0.10, y: LAT - 0.05),
                        (x: LON + 0.10, y: LAT + 0.05),
                        (x: LON + 0.05, y: LAT + 0.05)
                    ]
                    .into(),
                ),
                Feature::new("8 km", south(8.0)),
                Feature::new("12 km", south(12.0)),
            ],
        )
    }

    fn names<'a>(collection: &'a FeatureCollection, results: &[NearbyFeature]) -> Vec<&'a str> {
        results
            .iter()
            .map(|r| collection.features[r.index].display_name())
            .collect()
    }

    #[test]
    fn three_km_feature_found_eight_km_feature_not() {
        let collection = FeatureCollection::new(
            "mem.kml",
            vec![
                Feature::new("near", south(3.0)),
                Feature::new("far", south(8.0)),
            ],
        );
        let results = find_nearby(&collection, &query(5.0), None);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 0);
        assert_relative_eq!(results[0].distance_m, 3000.0, epsilon = 1.0);
    }

    #[test]
    fn results_are_sorted_by_distance() {
        let collection = mixed_collection();
        let results = find_nearby(&collection, &query(20.0), None);
        assert_eq!(
            names(&collection, &results),
            vec!["crossing line", "3 km", "block", "8 km", "12 km"]
        );
        assert!(results.windows(2).all(|w| w[0].distance_m <= w[1].distance_m));
    }

    #[test]
    fn line_crossing_the_disc_is_found_without_nearby_vertices() {
        let collection = mixed_collection();
        let results = find_nearby(&collection, &query(5.0), None);
        let line = results
            .iter()
            .find(|r| collection.features[r.index].display_name() == "crossing line")
            .expect("line should intersect the disc");
        assert_relative_eq!(line.distance_m, 0.02 * METERS_PER_DEGREE, epsilon = 1e-6);
    }

    #[test]
    fn point_inside_polygon_has_zero_distance() {
        let collection = FeatureCollection::new(
            "mem.kml",
            vec![Feature::new(
                "around",
                polygon![
                    (x: LON - 0.01, y: LAT - 0.01),
                    (x: LON + 0.01, y: LAT - 0.01),
                    (x: LON + 0.01, y: LAT + 0.01),
                    (x: LON - 0.01, y: LAT + 0.01)
                ]
                .into(),
            )],
        );
        let results = find_nearby(&collection, &query(1.0), None);
        assert_eq!(results.len(), 1);
        assert_relative_eq!(results[0].distance_m, 0.0);
    }

    #[test]
    fn larger_radius_is_a_superset() {
        let collection = mixed_collection();
        let radii = [1.0, 2.5, 5.0, 7.9, 8.1, 15.0, 40.0];
        for pair in radii.windows(2) {
            let small: BTreeSet<usize> = find_nearby(&collection, &query(pair[0]), None)
                .iter()
                .map(|r| r.index)
                .collect();
            let large: BTreeSet<usize> = find_nearby(&collection, &query(pair[1]), None)
                .iter()
                .map(|r| r.index)
                .collect();
            assert!(small.is_subset(&large), "{} km vs {} km", pair[0], pair[1]);
        }
    }

    #[test]
    fn invalid_and_missing_geometries_never_appear() {
        let mut collection = mixed_collection();
        collection.features.push(Feature::new(
            "nan",
            point!(x: f64::NAN, y: LAT).into(),
        ));
        collection
            .features
            .push(Feature::new("empty", LineString::<f64>::new(vec![]).into()));
        collection.features.push(Feature {
            name: Some("no geometry".into()),
            ..Feature::default()
        });
        let results = find_nearby(&collection, &query(50.0), None);
        let found = names(&collection, &results);
        assert!(!found.contains(&"nan"));
        assert!(!found.contains(&"empty"));
        assert!(!found.contains(&"no geometry"));
        assert_eq!(found.len(), 6);
    }

    #[test]
    fn repeated_queries_are_identical() {
        let collection = mixed_collection();
        let ctx = query(10.0);
        assert_eq!(
            find_nearby(&collection, &ctx, None),
            find_nearby(&collection, &ctx, None)
        );
    }

    #[test]
    fn empty_collection_yields_empty_result() {
        let collection = FeatureCollection::default();
        assert!(find_nearby(&collection, &query(50.0), None).is_empty());
        let index = SpatialIndex::build(&collection);
        assert!(index.is_empty());
        assert!(find_nearby(&collection, &query(50.0), Some(&index)).is_empty());
    }

    #[test]
    fn equal_distances_keep_input_order() {
        let collection = FeatureCollection::new(
            "mem.kml",
            vec![
                Feature::new("second", south(2.0)),
                Feature::new("first", south(1.0)),
                Feature::new("twin", south(2.0)),
            ],
        );
        let results = find_nearby(&collection, &query(5.0), None);
        assert_eq!(names(&collection, &results), vec!["first", "second", "twin"]);
    }

    #[test]
    fn non_positive_radius_is_rejected() {
        let point = QueryPoint::new(LAT, LON).unwrap();
        assert!(matches!(
            QueryContext::new(point, 0.0),
            Err(MapperError::InvalidRadius(_))
        ));
        assert!(QueryContext::new(point, -3.0).is_err());
        assert!(QueryContext::new(point, f64::NAN).is_err());
    }

    #[test]
    fn spatial_index_does_not_change_results() {
        // deterministic scatter around the query point
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 10_000) as f64 / 10_000.0 - 0.5
        };
        let mut features = Vec::new();
        for i in 0..1_000 {
            let (dx, dy) = (next() * 0.6, next() * 0.6);
            let geometry: Geometry<f64> = if i % 3 == 0 {
                line_string![(x: LON + dx, y: LAT + dy), (x: LON + dx + 0.05, y: LAT + dy)].into()
            } else {
                point!(x: LON + dx, y: LAT + dy).into()
            };
            features.push(Feature::new(format!("f{i}"), geometry));
        }
        let collection = FeatureCollection::new("mem.kml", features);
        let index = SpatialIndex::build_if_large(&collection, DEFAULT_INDEX_THRESHOLD)
            .expect("collection is above the threshold");
        assert_eq!(index.len(), 1_000);

        for radius in [0.5, 3.0, 10.0, 25.0] {
            for model in [DistanceModel::Planar, DistanceModel::Geodesic] {
                let ctx = query(radius).with_model(model);
                assert_eq!(
                    find_nearby(&collection, &ctx, None),
                    find_nearby(&collection, &ctx, Some(&index)),
                    "radius {radius} km, {model:?}"
                );
            }
        }
    }

    /// `targets` followed by enough far-away filler to get an index built.
    fn indexed_collection(targets: Vec<Feature>) -> (FeatureCollection, SpatialIndex) {
        let mut features = targets;
        for i in 0..300 {
            let lon = -60.0 + (i % 30) as f64;
            let lat = -30.0 + (i / 30) as f64;
            features.push(Feature::new(format!("filler {i}"), point!(x: lon, y: lat).into()));
        }
        let collection = FeatureCollection::new("mem.kml", features);
        let index = SpatialIndex::build_if_large(&collection, DEFAULT_INDEX_THRESHOLD)
            .expect("collection is above the threshold");
        (collection, index)
    }

    #[test]
    fn geodesic_index_finds_features_across_the_antimeridian() {
        let (collection, index) = indexed_collection(vec![
            Feature::new("west of the line", point!(x: -179.99, y: 0.0).into()),
            Feature::new("east of the line", point!(x: 179.97, y: 0.01).into()),
        ]);
        for lon in [179.99, -179.99] {
            let ctx = QueryContext::new(QueryPoint::new(0.0, lon).unwrap(), 5.0)
                .unwrap()
                .with_model(DistanceModel::Geodesic);
            let plain = find_nearby(&collection, &ctx, None);
            assert_eq!(plain.len(), 2, "query at lon {lon}");
            assert_eq!(plain, find_nearby(&collection, &ctx, Some(&index)), "query at lon {lon}");
        }
    }

    #[test]
    fn geodesic_index_finds_features_near_the_pole() {
        let (collection, index) = indexed_collection(vec![
            // about 20 km away, well east in longitude
            Feature::new("poleward", point!(x: -10.8, y: 89.51).into()),
            // across the pole
            Feature::new("other side", point!(x: -160.0, y: 89.9).into()),
        ]);
        let ctx = QueryContext::new(QueryPoint::new(89.5, 20.0).unwrap(), 20.0)
            .unwrap()
            .with_model(DistanceModel::Geodesic);
        let plain = find_nearby(&collection, &ctx, None);
        assert!(names(&collection, &plain).contains(&"poleward"));
        assert_eq!(plain, find_nearby(&collection, &ctx, Some(&index)));

        let ctx = QueryContext::new(QueryPoint::new(89.95, 0.0).unwrap(), 20.0)
            .unwrap()
            .with_model(DistanceModel::Geodesic);
        let plain = find_nearby(&collection, &ctx, None);
        assert_eq!(names(&collection, &plain), vec!["other side"]);
        assert_eq!(plain, find_nearby(&collection, &ctx, Some(&index)));
    }

    #[test]
    fn geodesic_search_boxes_cover_every_point_within_the_radius() {
        let covered = |boxes: &[AABB<[f64; 2]>], lon: f64, lat: f64| {
            boxes.iter().any(|b| {
                let (lo, hi) = (b.lower(), b.upper());
                lo[0] <= lon && lon <= hi[0] && lo[1] <= lat && lat <= hi[1]
            })
        };
        for (lat, lon, radius_km) in [(89.5, 20.0, 20.0), (75.0, 179.9, 50.0), (-88.0, -179.5, 30.0)] {
            let query = QueryPoint::new(lat, lon).unwrap();
            let ctx = QueryContext::new(query, radius_km)
                .unwrap()
                .with_model(DistanceModel::Geodesic);
            let boxes = ctx.search_envelopes();
            for i in 0..=100 {
                let p_lat = (lat - 1.0 + i as f64 * 0.02).clamp(-90.0, 90.0);
                for j in 0..=360 {
                    let p_lon = -180.0 + j as f64;
                    let d = Geodesic.distance(query.to_point(), Point::new(p_lon, p_lat));
                    if d <= radius_km * 1000.0 {
                        assert!(
                            covered(&boxes, p_lon, p_lat),
                            "({p_lat}, {p_lon}) at {d:.1} m escapes the boxes of ({lat}, {lon})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn small_collections_are_not_indexed() {
        assert!(SpatialIndex::build_if_large(&mixed_collection(), DEFAULT_INDEX_THRESHOLD).is_none());
    }

    #[test]
    fn folder_filter_includes_subfolders() {
        let collection = FeatureCollection::new(
            "mem.kml",
            vec![
                Feature::new("a", south(1.0)).with_folder("Wells"),
                Feature::new("b", south(2.0)).with_folder("Wells/Abandoned"),
                Feature::new("c", south(3.0)).with_folder("Wellsite"),
                Feature::new("d", south(4.0)),
            ],
        );
        let ctx = query(10.0).with_filter(FeatureFilter::default().with_folders(["Wells"]));
        let results = find_nearby(&collection, &ctx, None);
        assert_eq!(names(&collection, &results), vec!["a", "b"]);
    }

    #[test]
    fn kind_filter_drops_hidden_kinds() {
        let collection = mixed_collection();
        let filter = FeatureFilter::default()
            .with_kind_toggled(GeometryKind::Line)
            .with_kind_toggled(GeometryKind::Polygon);
        assert!(!filter.shows(GeometryKind::Line));
        let ctx = query(20.0).with_filter(filter);
        let results = find_nearby(&collection, &ctx, None);
        assert_eq!(names(&collection, &results), vec!["3 km", "8 km", "12 km"]);
    }

    #[test]
    fn geodesic_model_accounts_for_longitude_compression() {
        // 0.1 degree of longitude at 60 N: 11.1 km under the planar
        // approximation, about 5.6 km on the ellipsoid.
        let collection = FeatureCollection::new(
            "mem.kml",
            vec![Feature::new("east", point!(x: 10.1, y: 60.0).into())],
        );
        let ctx = QueryContext::new(QueryPoint::new(60.0, 10.0).unwrap(), 8.0).unwrap();

        assert!(find_nearby(&collection, &ctx, None).is_empty());

        let geodesic = find_nearby(&collection, &ctx.clone().with_model(DistanceModel::Geodesic), None);
        assert_eq!(geodesic.len(), 1);
        assert!((geodesic[0].distance_m - 5_580.0).abs() < 50.0, "{}", geodesic[0].distance_m);
    }

    #[test]
    fn planar_and_geodesic_agree_roughly_along_a_meridian_near_the_equator() {
        let collection = FeatureCollection::new("mem.kml", vec![Feature::new("s", south(3.0))]);
        let planar = find_nearby(&collection, &query(5.0), None);
        let geodesic = find_nearby(
            &collection,
            &query(5.0).with_model(DistanceModel::Geodesic),
            None,
        );
        assert_relative_eq!(planar[0].distance_m, 3000.0, epsilon = 1.0);
        // 111 km/deg overstates a degree of latitude near the equator (~110.6 km)
        assert!((geodesic[0].distance_m - 2_988.0).abs() < 10.0, "{}", geodesic[0].distance_m);
    }

    #[test]
    fn batch_reports_counts_and_closest() {
        let collection = mixed_collection();
        let points = [
            QueryPoint::new(LAT, LON).unwrap(),
            QueryPoint::new(LAT + 5.0, LON).unwrap(),
        ];
        let results =
            batch_analysis(&collection, &points, 5.0, DistanceModel::Planar, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].features_found, 2);
        assert!(results[0].closest_distance_m.is_some());
        assert_eq!(results[1].features_found, 0);
        assert_eq!(results[1].closest_distance_m, None);

        assert!(batch_analysis(&collection, &points, 0.0, DistanceModel::Planar, None).is_err());
    }
}
