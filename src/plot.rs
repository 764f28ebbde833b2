// plot.rs

use std::collections::HashSet;
use std::path::Path;

use geo::{Geometry, LineString};
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use tracing::info;

use crate::error::{MapperError, Result};
use crate::features::{FeatureCollection, GeometryKind};
use crate::nearby::{NearbyFeature, QueryContext};

type Chart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

const BACKGROUND: RGBColor = RGBColor(173, 216, 230); // Light blue ocean background
const FEATURE_COLORS: [RGBColor; 4] = [
    RGBColor(0, 0, 255),   // Points
    RGBColor(0, 128, 0),   // Lines
    RGBColor(128, 0, 128), // Polygons
    RGBColor(90, 90, 90),  // Collections
];
const NEARBY_COLOR: RGBColor = RGBColor(255, 0, 0);
const DISC_COLOR: RGBColor = RGBColor(255, 140, 0);

pub struct PlotOptions {
    pub width: u32,
    pub height: u32,
    pub caption: Option<String>,
    /// Axis mesh with degree labels.
    pub mesh: bool,
}

impl Default for PlotOptions {
    fn default() -> Self {
        PlotOptions {
            width: 1024,
            height: 768,
            caption: Some(String::from("Nearby Features")),
            mesh: true,
        }
    }
}

fn plot_err<E: std::fmt::Display>(e: E) -> MapperError {
    MapperError::Plot(e.to_string())
}

fn kind_color(kind: GeometryKind) -> RGBColor {
    match kind {
        GeometryKind::Point => FEATURE_COLORS[0],
        GeometryKind::Line => FEATURE_COLORS[1],
        GeometryKind::Polygon => FEATURE_COLORS[2],
        GeometryKind::Collection => FEATURE_COLORS[3],
    }
}

/// Lon/lat ranges for the chart: the search disc with margin when there is a
/// query, otherwise the padded collection bbox, otherwise the whole world.
fn chart_ranges(
    collection: &FeatureCollection,
    ctx: Option<&QueryContext>,
) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    if let Some(ctx) = ctx {
        let pad = ctx.degree_buffer() * 1.5;
        return (
            (ctx.point.lon - pad).max(-180.0)..(ctx.point.lon + pad).min(180.0),
            (ctx.point.lat - pad).max(-90.0)..(ctx.point.lat + pad).min(90.0),
        );
    }
    match collection.bbox() {
        Some([min_lon, min_lat, max_lon, max_lat]) => {
            let padding_percentage = 0.1; // 10% padding
            let epsilon = 0.001;
            let lon_padding = (max_lon - min_lon).max(epsilon) * padding_percentage;
            let lat_padding = (max_lat - min_lat).max(epsilon) * padding_percentage;
            (
                (min_lon - lon_padding).max(-180.0)..(max_lon + lon_padding).min(180.0),
                (min_lat - lat_padding).max(-90.0)..(max_lat + lat_padding).min(90.0),
            )
        }
        None => (-180.0..180.0, -90.0..90.0),
    }
}

fn draw_ring(chart: &mut Chart, ring: &LineString<f64>, style: ShapeStyle) -> Result<()> {
    chart
        .draw_series(LineSeries::new(ring.coords().map(|c| (c.x, c.y)), style))
        .map_err(plot_err)?;
    Ok(())
}

fn draw_geometry(chart: &mut Chart, geometry: &Geometry<f64>, style: ShapeStyle) -> Result<()> {
    match geometry {
        Geometry::Point(p) => {
            chart
                .draw_series(PointSeries::of_element(
                    vec![(p.x(), p.y())],
                    4, // Point size
                    style.filled(),
                    &|c, s, st| EmptyElement::at(c) + Circle::new((0, 0), s, st),
                ))
                .map_err(plot_err)?;
        }
        Geometry::MultiPoint(points) => {
            chart
                .draw_series(PointSeries::of_element(
                    points.iter().map(|p| (p.x(), p.y())),
                    4,
                    style.filled(),
                    &|c, s, st| EmptyElement::at(c) + Circle::new((0, 0), s, st),
                ))
                .map_err(plot_err)?;
        }
        Geometry::Line(line) => {
            draw_ring(chart, &LineString::from(vec![line.start, line.end]), style)?;
        }
        Geometry::LineString(line) => draw_ring(chart, line, style)?,
        Geometry::MultiLineString(lines) => {
            for line in lines {
                draw_ring(chart, line, style)?;
            }
        }
        // Polygons are outlined by their exterior ring only.
        Geometry::Polygon(polygon) => draw_ring(chart, polygon.exterior(), style)?,
        Geometry::MultiPolygon(polygons) => {
            for polygon in polygons {
                draw_ring(chart, polygon.exterior(), style)?;
            }
        }
        Geometry::Rect(rect) => draw_ring(chart, rect.to_polygon().exterior(), style)?,
        Geometry::Triangle(triangle) => {
            draw_ring(chart, triangle.to_polygon().exterior(), style)?
        }
        Geometry::GeometryCollection(collection) => {
            for member in collection {
                draw_geometry(chart, member, style)?;
            }
        }
    }
    Ok(())
}

/// Renders the collection to a PNG; with a query, the search disc, the query
/// point and the nearby features are drawn on top.
pub fn render_png(
    path: &Path,
    collection: &FeatureCollection,
    ctx: Option<&QueryContext>,
    results: &[NearbyFeature],
    options: &PlotOptions,
) -> Result<()> {
    let (x_range, y_range) = chart_ranges(collection, ctx);
    let root = BitMapBackend::new(path, (options.width, options.height)).into_drawing_area();
    root.fill(&BACKGROUND).map_err(plot_err)?;

    let mut builder = ChartBuilder::on(&root);
    builder.margin(10);
    if let Some(caption) = &options.caption {
        builder.caption(caption, ("sans-serif", 32).into_font());
    }
    if options.mesh {
        builder.x_label_area_size(30).y_label_area_size(50);
    }
    let mut chart = builder
        .build_cartesian_2d(x_range, y_range)
        .map_err(plot_err)?;
    if options.mesh {
        chart.configure_mesh().draw().map_err(plot_err)?;
    }

    let nearby: HashSet<usize> = results.iter().map(|r| r.index).collect();
    for (idx, feature) in collection.features.iter().enumerate() {
        if nearby.contains(&idx) {
            continue;
        }
        if let Some(geometry) = feature.usable_geometry() {
            let color = kind_color(GeometryKind::of(geometry));
            draw_geometry(&mut chart, geometry, color.stroke_width(1))?;
        }
    }

    if let Some(ctx) = ctx {
        draw_ring(&mut chart, ctx.search_disc().exterior(), DISC_COLOR.stroke_width(2))?;
        for result in results {
            if let Some(geometry) = collection.features[result.index].usable_geometry() {
                draw_geometry(&mut chart, geometry, NEARBY_COLOR.stroke_width(2))?;
            }
        }
        chart
            .draw_series(std::iter::once(Cross::new(
                (ctx.point.lon, ctx.point.lat),
                8,
                BLACK.stroke_width(2),
            )))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    info!(path = %path.display(), nearby = results.len(), "plot written");
    Ok(())
}
