// ui.rs

use geo::{Geometry, LineString};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap,
        canvas::{Canvas, Context, Line as CanvasLine, Map, MapResolution, Points},
    },
};

use crate::app::{App, AppMode, Basemap, CurrentScreen};
use crate::features::{GeometryKind, geometry_type_name};

const DISC_COLOR: Color = Color::Rgb(255, 140, 0);
const NEARBY_COLOR: Color = Color::Red;
const SELECTED_COLOR: Color = Color::Yellow;

fn kind_color(kind: GeometryKind) -> Color {
    match kind {
        GeometryKind::Point => Color::LightBlue,
        GeometryKind::Line => Color::Green,
        GeometryKind::Polygon => Color::Magenta,
        GeometryKind::Collection => Color::Gray,
    }
}

pub fn render(frame: &mut Frame, app: &mut App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(3)]) // Main content, then footer
        .split(frame.size());

    match app.current_screen {
        CurrentScreen::Dashboard => render_dashboard(frame, app, main_layout[0]),
        CurrentScreen::Help => render_help_screen(frame, app, main_layout[0]),
    }

    // Render the footer, common across all screens
    render_footer(frame, app, main_layout[1]);
}

/// Renders the help screen.
fn render_help_screen(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Help Screen ")
        .title_style(Style::default().fg(Color::Yellow).bold())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let mut lines = vec![Line::from("Keybinds:").bold(), Line::from("")];
    lines.extend(app.help_keybinds.iter().map(|s| Line::from(format!("  {}", s))));
    lines.push(Line::from(""));
    lines.push(Line::from("Press any key to return.").fg(Color::Gray));

    let help_text = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(Color::LightGreen));

    frame.render_widget(help_text, area);
}

fn render_dashboard(frame: &mut Frame, app: &mut App, area: Rect) {
    // Notification, spacer, optional search bar, then the main content
    let mut constraints = vec![Constraint::Length(1), Constraint::Length(1)];
    if app.current_mode == AppMode::Searching {
        constraints.push(Constraint::Length(1));
    }
    constraints.push(Constraint::Min(0));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let mut current_chunk_idx = 0;

    // Notification Area
    let notification_style = if app.notification_is_error {
        Style::default().fg(Color::White).bg(Color::Red)
    } else {
        Style::default().fg(Color::White).bg(Color::DarkGray)
    };
    let notification_paragraph = Paragraph::new(app.notification.clone())
        .alignment(Alignment::Center)
        .style(notification_style);
    frame.render_widget(notification_paragraph, chunks[current_chunk_idx]);
    current_chunk_idx += 1;

    // Spacer
    frame.render_widget(Paragraph::new(""), chunks[current_chunk_idx]);
    current_chunk_idx += 1;

    // Search Bar (conditional)
    if app.current_mode == AppMode::Searching {
        let search_layout = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(8), // "Search:" label
                Constraint::Min(0),    // Input field
            ])
            .split(chunks[current_chunk_idx]);

        let search_label = Paragraph::new("Search:").style(Style::default().fg(Color::LightCyan));
        frame.render_widget(search_label, search_layout[0]);

        let search_input_paragraph = Paragraph::new(app.search_query_buffer.clone())
            .style(Style::default().fg(Color::Yellow));
        frame.render_widget(search_input_paragraph, search_layout[1]);
        frame.set_cursor(
            search_layout[1].x + app.search_query_cursor as u16,
            search_layout[1].y,
        );
        current_chunk_idx += 1;
    }

    // Main Content Area (Map + Right Panels)
    let main_content_area = chunks[current_chunk_idx];
    app.content_area = main_content_area;
    let main_content_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(app.left_pane_width_percentage), // Dynamically sized map pane
            Constraint::Percentage(100 - app.left_pane_width_percentage), // Dynamically sized right pane
        ])
        .split(main_content_area);

    render_map(frame, app, main_content_layout[0]);

    let right_panel_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(9),      // Query controls
            Constraint::Length(10),     // File information
            Constraint::Min(5),         // Results table
            Constraint::Percentage(25), // Selected feature details
        ])
        .split(main_content_layout[1]);

    render_query_panel(frame, app, right_panel_chunks[0]);
    render_info_panel(frame, app, right_panel_chunks[1]);
    render_results_table(frame, app, right_panel_chunks[2]);
    render_details_panel(frame, app, right_panel_chunks[3]);

    // divider for resizing the main panels
    let divider_x_pos = main_content_layout[1].x;
    let frame_area = frame.size();
    if divider_x_pos < frame_area.x + frame_area.width {
        for y in main_content_layout[0].y..(main_content_layout[0].y + main_content_layout[0].height) {
            let style = if app.is_resizing {
                Style::default().bg(Color::LightRed)
            } else {
                Style::default().bg(Color::DarkGray)
            };
            frame
                .buffer_mut()
                .get_mut(divider_x_pos, y)
                .set_symbol("│")
                .set_style(style);
        }
    }
}

fn draw_linestring(ctx: &mut Context, line: &LineString<f64>, color: Color) {
    for window in line.0.windows(2) {
        let (a, b) = (window[0], window[1]);
        ctx.draw(&CanvasLine {
            x1: a.x,
            y1: a.y,
            x2: b.x,
            y2: b.y,
            color,
        });
    }
}

fn draw_geometry(ctx: &mut Context, geometry: &Geometry<f64>, color: Color) {
    match geometry {
        Geometry::Point(p) => ctx.draw(&Points {
            coords: &[(p.x(), p.y())],
            color,
        }),
        Geometry::MultiPoint(points) => {
            let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.x(), p.y())).collect();
            ctx.draw(&Points {
                coords: &coords,
                color,
            });
        }
        Geometry::Line(line) => ctx.draw(&CanvasLine {
            x1: line.start.x,
            y1: line.start.y,
            x2: line.end.x,
            y2: line.end.y,
            color,
        }),
        Geometry::LineString(line) => draw_linestring(ctx, line, color),
        Geometry::MultiLineString(lines) => {
            for line in lines {
                draw_linestring(ctx, line, color);
            }
        }
        Geometry::Polygon(polygon) => draw_linestring(ctx, polygon.exterior(), color),
        Geometry::MultiPolygon(polygons) => {
            for polygon in polygons {
                draw_linestring(ctx, polygon.exterior(), color);
            }
        }
        Geometry::Rect(rect) => draw_linestring(ctx, rect.to_polygon().exterior(), color),
        Geometry::Triangle(triangle) => {
            draw_linestring(ctx, triangle.to_polygon().exterior(), color)
        }
        Geometry::GeometryCollection(collection) => {
            for member in collection {
                draw_geometry(ctx, member, color);
            }
        }
    }
}

/// Map canvas: optional world basemap, every feature coloured by kind, then
/// the search disc, the nearby features and the query point on top.
fn render_map(frame: &mut Frame, app: &mut App, area: Rect) {
    let title = match &app.analysis {
        Some(analysis) => format!(
            " Map ({} km around {}) ",
            analysis.context.radius_km, analysis.context.point
        ),
        None => String::from(" Map (click to analyze) "),
    };
    let block = Block::default()
        .title(title)
        .title_style(Style::default().fg(Color::Cyan).bold())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));
    app.map_area = block.inner(area);

    let app: &App = app;
    let selected = app.selected().map(|s| s.index);
    let canvas = Canvas::default()
        .block(block)
        .marker(Marker::Braille)
        .x_bounds(app.view.x_bounds())
        .y_bounds(app.view.y_bounds())
        .paint(|ctx| {
            match app.basemap {
                Basemap::Off => {}
                Basemap::WorldLow => ctx.draw(&Map {
                    resolution: MapResolution::Low,
                    color: Color::DarkGray,
                }),
                Basemap::WorldHigh => ctx.draw(&Map {
                    resolution: MapResolution::High,
                    color: Color::DarkGray,
                }),
            }
            ctx.layer();

            let Some(collection) = &app.collection else {
                return;
            };
            for feature in &collection.features {
                if let Some(geometry) = feature.usable_geometry() {
                    let kind = GeometryKind::of(geometry);
                    if app.filter.shows(kind) {
                        draw_geometry(ctx, geometry, kind_color(kind));
                    }
                }
            }
            ctx.layer();

            let Some(analysis) = &app.analysis else {
                return;
            };
            draw_linestring(ctx, analysis.context.search_disc().exterior(), DISC_COLOR);
            for result in &analysis.results {
                if let Some(geometry) = collection.features[result.index].usable_geometry() {
                    let color = if Some(result.index) == selected {
                        SELECTED_COLOR
                    } else {
                        NEARBY_COLOR
                    };
                    draw_geometry(ctx, geometry, color);
                }
            }
            ctx.layer();
            let point = analysis.context.point;
            ctx.print(point.lon, point.lat, "X".white().bold());
        });
    frame.render_widget(canvas, area);
}

fn toggle_label(on: bool) -> &'static str {
    if on { "Yes" } else { "No" }
}

fn render_query_panel(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Query ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::LightYellow));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Location
            Constraint::Length(1), // Radius
            Constraint::Length(1), // Distance model
            Constraint::Length(1), // Folder
            Constraint::Length(1), // Kind toggles
            Constraint::Length(1), // Basemap / zoom
            Constraint::Min(0),
        ])
        .split(inner);

    let location_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(10), // "Location:"
            Constraint::Min(0),     // Input field
        ])
        .split(rows[0]);
    frame.render_widget(Paragraph::new("Location:"), location_layout[0]);
    let editing = app.current_mode == AppMode::EditingLocation;
    let location_input = Paragraph::new(app.location_buffer.clone()).style(if editing {
        Style::default().fg(Color::White).bg(Color::Blue)
    } else {
        Style::default().fg(Color::White)
    });
    frame.render_widget(location_input, location_layout[1]);
    if editing {
        frame.set_cursor(
            location_layout[1].x + app.location_cursor as u16,
            location_layout[1].y,
        );
    }

    frame.render_widget(
        Paragraph::new(format!("Radius: {} km  ([ / ])", app.radius_km)),
        rows[1],
    );
    frame.render_widget(
        Paragraph::new(format!("Distance: {}", app.model.label())),
        rows[2],
    );
    frame.render_widget(
        Paragraph::new(format!("Folder: {}", app.folder_label())),
        rows[3],
    );
    frame.render_widget(
        Paragraph::new(format!(
            "Points: {}  Lines: {}  Polygons: {}",
            toggle_label(app.filter.shows(GeometryKind::Point)),
            toggle_label(app.filter.shows(GeometryKind::Line)),
            toggle_label(app.filter.shows(GeometryKind::Polygon)),
        )),
        rows[4],
    );
    frame.render_widget(
        Paragraph::new(format!(
            "Basemap: {}  Zoom: {}",
            app.basemap.label(),
            app.view.zoom
        )),
        rows[5],
    );
}

fn render_info_panel(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" File Information ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::LightBlue));

    let mut text = vec![Line::from(format!("File: {}", app.kml_path.display()))];
    if let Some(error) = &app.load_error {
        text.push(Line::from(format!("Error: {}", error)).fg(Color::Red));
        text.push(Line::from("Fix the file and press R to reload.").fg(Color::Gray));
    } else if let Some(info) = &app.info {
        text.extend(info.lines().into_iter().map(Line::from));
    } else {
        text.push(Line::from("Loading file info...").fg(Color::Gray));
    }

    let paragraph = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_results_table(frame: &mut Frame, app: &App, area: Rect) {
    let visible = app.visible_results();
    let title = match &app.analysis {
        Some(analysis) if visible.len() != analysis.results.len() => {
            format!(" Results ({} of {}) ", visible.len(), analysis.results.len())
        }
        Some(analysis) => format!(" Results ({}) ", analysis.results.len()),
        None => String::from(" Results "),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::LightGreen));

    let Some(collection) = &app.collection else {
        frame.render_widget(Paragraph::new("No data loaded.").block(block), area);
        return;
    };
    if app.analysis.is_none() {
        frame.render_widget(
            Paragraph::new("Enter a location or click the map.")
                .block(block)
                .fg(Color::Gray),
            area,
        );
        return;
    }

    let header = Row::new(["#", "Name", "Distance (m)", "Type", "Folder"])
        .style(Style::default().fg(Color::LightCyan).add_modifier(Modifier::BOLD));
    let rows: Vec<Row> = visible
        .iter()
        .enumerate()
        .map(|(rank, result)| {
            let feature = &collection.features[result.index];
            Row::new(vec![
                Cell::from((rank + 1).to_string()),
                Cell::from(feature.display_name().to_string()),
                Cell::from(format!("{:.1}", result.distance_m)),
                Cell::from(
                    feature
                        .geometry
                        .as_ref()
                        .map(geometry_type_name)
                        .unwrap_or("-"),
                ),
                Cell::from(feature.folder.clone().unwrap_or_default()),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Percentage(40),
            Constraint::Length(13),
            Constraint::Length(16),
            Constraint::Min(6),
        ],
    )
    .header(header)
    .block(block)
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    let mut state = TableState::default().with_selected(if visible.is_empty() {
        None
    } else {
        Some(app.selected_result)
    });
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_details_panel(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Selected Feature ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::LightCyan));
    let details = app.selected_details();
    let text: Vec<Line> = if details.is_empty() {
        vec![Line::from("Nothing selected.").fg(Color::Gray)]
    } else {
        details.into_iter().map(Line::from).collect()
    };
    frame.render_widget(
        Paragraph::new(text).block(block).wrap(Wrap { trim: false }),
        area,
    );
}

/// Footer: mode, data status and the two keys everyone needs.
fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let mode = match (app.current_screen, app.current_mode) {
        (CurrentScreen::Help, _) => "Help",
        (_, AppMode::Navigation) => "Navigation",
        (_, AppMode::EditingLocation) => "Editing Location",
        (_, AppMode::Searching) => "Searching",
    };
    let bold = Style::default().add_modifier(Modifier::BOLD);

    let data_status = match (&app.collection, &app.load_error) {
        (Some(collection), _) => Span::styled(
            format!("{} features", collection.len()),
            bold.fg(Color::LightGreen),
        ),
        (None, Some(_)) => Span::styled("load failed", bold.fg(Color::Red)),
        (None, None) => Span::styled("no data", bold.fg(Color::Gray)),
    };
    let results = match &app.analysis {
        Some(analysis) => format!("{} nearby", analysis.results.len()),
        None => String::from("no query"),
    };

    let footer_text = Line::from(vec![
        Span::raw("Mode: "),
        Span::styled(mode, bold.fg(Color::LightMagenta)),
        Span::raw(" | "),
        data_status,
        Span::raw(" | "),
        Span::styled(results, bold.fg(Color::LightBlue)),
        Span::raw(" | "),
        Span::styled("q", bold.fg(Color::Red)),
        Span::raw(" quit  "),
        Span::styled("h", bold.fg(Color::Green)),
        Span::raw(" help"),
    ]);

    let footer = Paragraph::new(footer_text)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .style(Style::default().fg(Color::Gray));

    frame.render_widget(footer, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppSettings;
    use crate::cache::LoadCache;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::{Terminal, backend::TestBackend};
    use std::time::Duration;

    const KML: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document>
      <Placemark><name>Well A</name><Point><coordinates>106.816666,-6.227027</coordinates></Point></Placemark>
    </Document></kml>"#;

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer.content.iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn dashboard_shows_ranked_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.kml");
        std::fs::write(&path, KML).unwrap();
        let mut app = App::new(AppSettings {
            kml_path: path,
            output_dir: dir.path().to_path_buf(),
            cache: LoadCache::new(Duration::from_secs(60)),
            index_threshold: 256,
            lat: -6.2,
            lon: 106.816666,
            radius_km: 5.0,
        });
        app.basemap = Basemap::Off;
        app.load_master(false);
        app.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));

        let mut terminal = Terminal::new(TestBackend::new(160, 50)).unwrap();
        terminal.draw(|f| render(f, &mut app)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("Well A"));
        assert!(text.contains("3000.0"));
        assert!(app.map_area.width > 0);
    }

    #[test]
    fn load_error_is_shown() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(AppSettings {
            kml_path: dir.path().join("missing.kml"),
            output_dir: dir.path().to_path_buf(),
            cache: LoadCache::new(Duration::from_secs(60)),
            index_threshold: 256,
            lat: -6.2,
            lon: 106.816666,
            radius_km: 5.0,
        });
        app.basemap = Basemap::Off;
        app.load_master(false);

        let mut terminal = Terminal::new(TestBackend::new(160, 50)).unwrap();
        terminal.draw(|f| render(f, &mut app)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("No data loaded."));
        assert!(text.contains("press R to reload"));
    }
}
