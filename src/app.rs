// app.rs

use std::path::PathBuf;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tracing::{error, info};

use crate::cache::LoadCache;
use crate::coords::{QueryPoint, parse_lat_lon};
use crate::export::{self, ExportFormat};
use crate::features::{CollectionInfo, FeatureCollection, GeometryKind, geometry_type_name};
use crate::nearby::{
    DistanceModel, FeatureFilter, NearbyFeature, QueryContext, SpatialIndex, find_nearby,
};
use crate::plot::{self, PlotOptions};

pub const MIN_RADIUS_KM: f64 = 1.0;
pub const MAX_RADIUS_KM: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentScreen {
    Dashboard,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Navigation,
    EditingLocation,
    Searching,
}

/// Where the point of an analysis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    Manual,
    MapClick,
}

/// Result of one analysis. Replaced as a whole on every new query.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub context: QueryContext,
    pub results: Vec<NearbyFeature>,
    pub source: QuerySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basemap {
    Off,
    WorldLow,
    WorldHigh,
}

impl Basemap {
    pub fn next(self) -> Self {
        match self {
            Basemap::Off => Basemap::WorldLow,
            Basemap::WorldLow => Basemap::WorldHigh,
            Basemap::WorldHigh => Basemap::Off,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Basemap::Off => "Off",
            Basemap::WorldLow => "World (low)",
            Basemap::WorldHigh => "World (high)",
        }
    }
}

/// Visible window of the map canvas in lon/lat degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    pub center_lon: f64,
    pub center_lat: f64,
    pub zoom: u8,
}

impl MapView {
    pub const MAX_ZOOM: u8 = 18;

    pub fn lon_span(&self) -> f64 {
        360.0 / 2f64.powi(self.zoom as i32)
    }

    // terminal cells are about twice as tall as they are wide
    pub fn lat_span(&self) -> f64 {
        (self.lon_span() / 2.0).min(180.0)
    }

    pub fn x_bounds(&self) -> [f64; 2] {
        let half = self.lon_span() / 2.0;
        [self.center_lon - half, self.center_lon + half]
    }

    pub fn y_bounds(&self) -> [f64; 2] {
        let half = self.lat_span() / 2.0;
        [self.center_lat - half, self.center_lat + half]
    }

    fn zoom_for_span(span_deg: f64) -> u8 {
        if !(span_deg.is_finite() && span_deg > 0.0) {
            return Self::MAX_ZOOM;
        }
        (360.0 / span_deg).log2().floor().clamp(0.0, Self::MAX_ZOOM as f64) as u8
    }

    /// View that shows the whole [min_lon, min_lat, max_lon, max_lat] box.
    pub fn fit(bbox: [f64; 4]) -> Self {
        let lon_range = bbox[2] - bbox[0];
        let lat_range = bbox[3] - bbox[1];
        let span = (lon_range.max(lat_range * 2.0) * 1.2).max(0.01);
        MapView {
            center_lon: (bbox[0] + bbox[2]) / 2.0,
            center_lat: (bbox[1] + bbox[3]) / 2.0,
            zoom: Self::zoom_for_span(span),
        }
    }

    /// View centred on a query with the search disc and some margin in frame.
    pub fn around(ctx: &QueryContext) -> Self {
        MapView {
            center_lon: ctx.point.lon,
            center_lat: ctx.point.lat,
            zoom: Self::zoom_for_span(ctx.degree_buffer() * 2.0 * 3.0),
        }
    }

    pub fn zoomed(self, delta: i8) -> Self {
        let zoom = (self.zoom as i16 + delta as i16).clamp(0, Self::MAX_ZOOM as i16) as u8;
        MapView { zoom, ..self }
    }

    /// Moves the centre by a fraction of the visible span.
    pub fn panned(self, dx: f64, dy: f64) -> Self {
        MapView {
            center_lon: (self.center_lon + dx * self.lon_span()).clamp(-180.0, 180.0),
            center_lat: (self.center_lat + dy * self.lat_span()).clamp(-90.0, 90.0),
            ..self
        }
    }

    /// Lon/lat under a terminal cell of the map area, if the cell is inside it.
    /// A view panned past the antimeridian wraps longitude back into
    /// [-180, 180); latitude past a pole is pinned to it.
    pub fn cell_to_lon_lat(&self, area: Rect, column: u16, row: u16) -> Option<(f64, f64)> {
        if area.width == 0
            || area.height == 0
            || column < area.x
            || row < area.y
            || column >= area.x + area.width
            || row >= area.y + area.height
        {
            return None;
        }
        let [x0, x1] = self.x_bounds();
        let [y0, y1] = self.y_bounds();
        let fx = (column - area.x) as f64 + 0.5;
        let fy = (row - area.y) as f64 + 0.5;
        let lon = x0 + fx / area.width as f64 * (x1 - x0);
        let lat = y1 - fy / area.height as f64 * (y1 - y0);
        Some(((lon + 180.0).rem_euclid(360.0) - 180.0, lat.clamp(-90.0, 90.0)))
    }
}

impl Default for MapView {
    fn default() -> Self {
        MapView {
            center_lon: 0.0,
            center_lat: 0.0,
            zoom: 0,
        }
    }
}

pub struct App {
    pub current_screen: CurrentScreen,
    pub current_mode: AppMode, // Current operational mode of the TUI
    pub should_quit: bool,

    // Data source
    pub kml_path: PathBuf,
    pub output_dir: PathBuf,
    cache: LoadCache,
    index_threshold: usize,
    pub collection: Option<Arc<FeatureCollection>>,
    index: Option<SpatialIndex>,
    pub info: Option<CollectionInfo>,
    pub load_error: Option<String>,

    // Query form
    pub location_buffer: String,
    pub location_cursor: usize,
    pub previous_location_buffer: String,
    pub radius_km: f64,
    pub model: DistanceModel,
    pub filter: FeatureFilter,
    pub folder_choice: usize, // 0 = all folders, otherwise 1-based index into the folder list

    // Last analysis
    pub analysis: Option<Analysis>,
    pub selected_result: usize, // Index in `filtered_result_indices`

    // Fuzzy search over result names
    pub search_query_buffer: String,
    pub search_query_cursor: usize,
    pub previous_search_query_buffer: String,
    pub filtered_result_indices: Vec<usize>, // Indices into `analysis.results`

    // Map
    pub view: MapView,
    pub basemap: Basemap,
    pub map_area: Rect,     // Inner canvas area from the last frame
    pub content_area: Rect, // Area split by the resizable divider

    // UI related
    pub notification: String,
    pub notification_is_error: bool,
    pub help_keybinds: Vec<String>,

    // Resizing for the map / side panels
    pub left_pane_width_percentage: u16, // Width of the left (map) pane
    pub is_resizing: bool,               // True when actively dragging the divider
}

/// Startup parameters for [`App::new`].
pub struct AppSettings {
    pub kml_path: PathBuf,
    pub output_dir: PathBuf,
    pub cache: LoadCache,
    pub index_threshold: usize,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl App {
    /// Constructs a new `App` with initial states.
    pub fn new(settings: AppSettings) -> App {
        let location_buffer = format!("{:.6}, {:.6}", settings.lat, settings.lon);
        App {
            current_screen: CurrentScreen::Dashboard,
            current_mode: AppMode::Navigation,
            should_quit: false,

            kml_path: settings.kml_path,
            output_dir: settings.output_dir,
            cache: settings.cache,
            index_threshold: settings.index_threshold,
            collection: None,
            index: None,
            info: None,
            load_error: None,

            location_cursor: location_buffer.len(),
            location_buffer,
            previous_location_buffer: String::new(),
            radius_km: settings.radius_km.clamp(MIN_RADIUS_KM, MAX_RADIUS_KM),
            model: DistanceModel::Planar,
            filter: FeatureFilter::default(),
            folder_choice: 0,

            analysis: None,
            selected_result: 0,

            search_query_buffer: String::new(),
            search_query_cursor: 0,
            previous_search_query_buffer: String::new(),
            filtered_result_indices: Vec::new(),

            view: MapView::default(),
            basemap: Basemap::WorldLow,
            map_area: Rect::default(),
            content_area: Rect::default(),

            notification: String::from("Press i to type a location, Enter to analyze, or click the map."),
            notification_is_error: false,
            help_keybinds: vec![
                "i: Edit location (lat, lon)".to_string(),
                "Enter: Analyze location".to_string(),
                "Click map: Analyze clicked point".to_string(),
                "[ / ]: Radius -/+ 1 km".to_string(),
                "+ / -: Zoom in/out".to_string(),
                "W/A/S/D: Pan map".to_string(),
                "J/K or Arrow Keys: Select result".to_string(),
                "C: Center map on selected result".to_string(),
                "/: Fuzzy search results".to_string(),
                "P/L/O: Toggle Points/Lines/Polygons".to_string(),
                "F: Cycle folder filter".to_string(),
                "G: Toggle planar/geodesic distance".to_string(),
                "B: Cycle basemap".to_string(),
                "E: Export CSV (Shift+E: GeoJSON, Shift+K: KML)".to_string(),
                "M: Save PNG map".to_string(),
                "X: Reset analysis".to_string(),
                "R: Reload file (Shift+R: bypass cache)".to_string(),
                "H: Show Help screen".to_string(),
                "Q: Quit the application".to_string(),
                "Click & Drag Divider: Resize panels".to_string(),
            ],

            left_pane_width_percentage: 55,
            is_resizing: false,
        }
    }

    fn notify(&mut self, message: impl Into<String>) {
        self.notification = message.into();
        self.notification_is_error = false;
    }

    fn notify_error(&mut self, message: impl Into<String>) {
        self.notification = message.into();
        self.notification_is_error = true;
    }

    /// Loads (or reloads) the master file through the cache. On failure the
    /// previous data is dropped and analysis is blocked until a reload works.
    pub fn load_master(&mut self, bypass_cache: bool) {
        if bypass_cache {
            self.cache.invalidate(&self.kml_path);
        }
        match self.cache.load(&self.kml_path) {
            Ok(collection) => {
                let same_data = self
                    .collection
                    .as_ref()
                    .is_some_and(|old| Arc::ptr_eq(old, &collection));
                if !same_data {
                    self.index = SpatialIndex::build_if_large(&collection, self.index_threshold);
                    self.info = match CollectionInfo::gather(&self.kml_path, &collection) {
                        Ok(info) => Some(info),
                        Err(e) => {
                            error!(error = %e, "could not read file metadata");
                            None
                        }
                    };
                }
                let count = collection.len();
                let bbox = collection.bbox();
                self.collection = Some(collection);
                self.load_error = None;
                if self.folder_choice > self.folders().len() {
                    self.folder_choice = 0;
                    self.filter = self.filter.clone().with_folders(Vec::<String>::new());
                }
                if self.analysis.is_some() {
                    self.rerun();
                } else if let Some(bbox) = bbox {
                    self.view = MapView::fit(bbox);
                }
                self.notify(format!(
                    "Loaded {} features from {}",
                    count,
                    self.kml_path.display()
                ));
            }
            Err(e) => {
                error!(path = %self.kml_path.display(), error = %e, "failed to load master file");
                self.collection = None;
                self.index = None;
                self.info = None;
                self.analysis = None;
                self.filtered_result_indices.clear();
                self.load_error = Some(e.to_string());
                self.notify_error(format!("Error: {}", e));
            }
        }
    }

    pub fn folders(&self) -> Vec<String> {
        self.info
            .as_ref()
            .map(|info| info.folders.clone())
            .unwrap_or_default()
    }

    pub fn folder_label(&self) -> String {
        match self.folder_choice {
            0 => String::from("All"),
            n => self
                .folders()
                .get(n - 1)
                .cloned()
                .unwrap_or_else(|| String::from("All")),
        }
    }

    /// Query context for `point` built from the current form values.
    pub fn query_context(&self, point: QueryPoint) -> crate::error::Result<QueryContext> {
        Ok(QueryContext::new(point, self.radius_km)?
            .with_model(self.model)
            .with_filter(self.filter.clone()))
    }

    /// Runs a fresh analysis and replaces the previous one.
    pub fn run_analysis(&mut self, point: QueryPoint, source: QuerySource) {
        let Some(collection) = self.collection.clone() else {
            let reason = self
                .load_error
                .clone()
                .unwrap_or_else(|| String::from("no file loaded"));
            self.notify_error(format!("No data loaded ({}). Press R to retry.", reason));
            return;
        };
        let ctx = match self.query_context(point) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.notify_error(format!("Error: {}", e));
                return;
            }
        };
        let results = find_nearby(&collection, &ctx, self.index.as_ref());
        info!(
            lat = point.lat,
            lon = point.lon,
            radius_km = ctx.radius_km,
            found = results.len(),
            ?source,
            "analysis finished"
        );
        if results.is_empty() {
            self.notify(format!("No features found within {} km of {}", ctx.radius_km, point));
        } else {
            self.notify(format!(
                "{} features within {} km of {} ({})",
                results.len(),
                ctx.radius_km,
                point,
                ctx.model.label()
            ));
        }
        let moved = self
            .analysis
            .as_ref()
            .is_none_or(|a| a.context.point != point);
        if moved {
            self.view = MapView::around(&ctx);
        }
        self.location_buffer = format!("{:.6}, {:.6}", point.lat, point.lon);
        self.location_cursor = self.location_buffer.len();
        self.analysis = Some(Analysis {
            context: ctx,
            results,
            source,
        });
        self.selected_result = 0;
        self.refilter_results();
    }

    /// Re-runs the current analysis with the current form values.
    fn rerun(&mut self) {
        if let Some((point, source)) = self
            .analysis
            .as_ref()
            .map(|a| (a.context.point, a.source))
        {
            self.run_analysis(point, source);
        }
    }

    pub fn analyze_typed_location(&mut self) {
        match parse_lat_lon(&self.location_buffer) {
            Ok(point) => self.run_analysis(point, QuerySource::Manual),
            Err(e) => self.notify_error(format!("Error: {}", e)),
        }
    }

    pub fn reset(&mut self) {
        self.analysis = None;
        self.selected_result = 0;
        self.search_query_buffer.clear();
        self.search_query_cursor = 0;
        self.filtered_result_indices.clear();
        if let Some(bbox) = self.collection.as_ref().and_then(|c| c.bbox()) {
            self.view = MapView::fit(bbox);
        }
        self.notify("Analysis reset.");
    }

    pub fn set_radius(&mut self, radius_km: f64) {
        let clamped = radius_km.clamp(MIN_RADIUS_KM, MAX_RADIUS_KM);
        if clamped == self.radius_km {
            self.notify(format!("Radius stays at {} km (range {}-{} km)", clamped, MIN_RADIUS_KM, MAX_RADIUS_KM));
            return;
        }
        self.radius_km = clamped;
        self.notify(format!("Radius set to {} km", clamped));
        self.rerun();
    }

    pub fn toggle_kind(&mut self, kind: GeometryKind) {
        self.filter = self.filter.clone().with_kind_toggled(kind);
        let state = if self.filter.shows(kind) { "ON" } else { "OFF" };
        self.notify(format!("{} visibility: {}", kind.label(), state));
        self.rerun();
    }

    pub fn cycle_folder(&mut self) {
        let folders = self.folders();
        if folders.is_empty() {
            self.notify("The loaded file has no folders.");
            return;
        }
        self.folder_choice = (self.folder_choice + 1) % (folders.len() + 1);
        let selected: Vec<String> = match self.folder_choice {
            0 => Vec::new(),
            n => vec![folders[n - 1].clone()],
        };
        self.filter = self.filter.clone().with_folders(selected);
        self.notify(format!("Folder filter: {}", self.folder_label()));
        self.rerun();
    }

    pub fn toggle_model(&mut self) {
        self.model = self.model.toggled();
        self.notify(format!("Distance model: {}", self.model.label()));
        self.rerun();
    }

    /// Result rows currently visible, after the fuzzy search.
    pub fn visible_results(&self) -> Vec<NearbyFeature> {
        match &self.analysis {
            Some(analysis) => self
                .filtered_result_indices
                .iter()
                .filter_map(|&i| analysis.results.get(i).copied())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn selected(&self) -> Option<NearbyFeature> {
        self.visible_results().get(self.selected_result).copied()
    }

    fn refilter_results(&mut self) {
        self.filtered_result_indices.clear();
        if let (Some(analysis), Some(collection)) = (&self.analysis, &self.collection) {
            for (i, result) in analysis.results.iter().enumerate() {
                let name = collection.features[result.index].display_name();
                if fuzzy_match(&self.search_query_buffer, name) {
                    self.filtered_result_indices.push(i);
                }
            }
        }
        if self.selected_result >= self.filtered_result_indices.len() {
            self.selected_result = self.filtered_result_indices.len().saturating_sub(1);
        }
    }

    /// Detail lines for the selected result.
    pub fn selected_details(&self) -> Vec<String> {
        let (Some(selected), Some(collection)) = (self.selected(), &self.collection) else {
            return Vec::new();
        };
        let feature = &collection.features[selected.index];
        let mut lines = vec![
            format!("Name: {}", feature.display_name()),
            format!("Distance: {:.1} m", selected.distance_m),
        ];
        if let Some(geometry) = &feature.geometry {
            lines.push(format!("Type: {}", geometry_type_name(geometry)));
        }
        if let Some(folder) = &feature.folder {
            lines.push(format!("Folder: {}", folder));
        }
        if let Some(measure) = feature.measure().describe() {
            lines.push(measure);
        }
        if let Some(description) = &feature.description {
            lines.push(format!("Description: {}", description));
        }
        for (key, value) in &feature.attributes {
            lines.push(format!("{}: {}", key, value));
        }
        lines
    }

    pub fn export(&mut self, format: ExportFormat) {
        let (Some(analysis), Some(collection)) = (&self.analysis, &self.collection) else {
            self.notify_error("Nothing to export: run an analysis first.");
            return;
        };
        let path = export::default_export_path(&self.output_dir, "nearby_features", format);
        let rows = analysis.results.len();
        match export::export_results(&path, format, collection, &analysis.results) {
            Ok(()) => self.notify(format!("Exported {} rows to {}", rows, path.display())),
            Err(e) => {
                error!(error = %e, "export failed");
                self.notify_error(format!("Export failed: {}", e));
            }
        }
    }

    pub fn save_plot(&mut self) {
        let Some(collection) = self.collection.clone() else {
            self.notify_error("Nothing to plot: no data loaded.");
            return;
        };
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self.output_dir.join(format!("nearby_plot_{}.png", stamp));
        let (ctx, results) = match &self.analysis {
            Some(a) => (Some(&a.context), a.results.as_slice()),
            None => (None, &[][..]),
        };
        match plot::render_png(&path, &collection, ctx, results, &PlotOptions::default()) {
            Ok(()) => self.notify(format!("Map saved to {}", path.display())),
            Err(e) => {
                error!(error = %e, "plot failed");
                self.notify_error(format!("Plot failed: {}", e));
            }
        }
    }

    pub fn center_on_selected(&mut self) {
        let point = self
            .selected()
            .zip(self.collection.as_ref())
            .and_then(|(s, c)| c.features[s.index].representative_point());
        match point {
            Some(p) => {
                self.view = MapView {
                    center_lon: p.x(),
                    center_lat: p.y(),
                    ..self.view
                };
                self.notify("Map centred on selected feature.");
            }
            None => self.notify("No result selected."),
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        match self.current_mode {
            AppMode::Navigation => self.handle_navigation_key(key),
            AppMode::EditingLocation => self.handle_location_key(key),
            AppMode::Searching => self.handle_search_key(key),
        }
    }

    fn handle_navigation_key(&mut self, key: KeyEvent) {
        if self.current_screen == CurrentScreen::Help {
            match key.code {
                KeyCode::Char('q') => self.should_quit = true,
                _ => self.current_screen = CurrentScreen::Dashboard,
            }
            return;
        }
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                self.notify("Exiting...");
            }
            KeyCode::Char('h') | KeyCode::Char('?') => self.current_screen = CurrentScreen::Help,
            KeyCode::Char('i') => {
                self.current_mode = AppMode::EditingLocation;
                self.previous_location_buffer.clone_from(&self.location_buffer);
                self.location_cursor = self.location_buffer.len();
                self.notify("Editing location. Press Enter to analyze, Escape to cancel.");
            }
            KeyCode::Enter => self.analyze_typed_location(),
            KeyCode::Char('[') => self.set_radius(self.radius_km - 1.0),
            KeyCode::Char(']') => self.set_radius(self.radius_km + 1.0),
            KeyCode::Char('+') | KeyCode::Char('=') => self.view = self.view.zoomed(1),
            KeyCode::Char('-') => self.view = self.view.zoomed(-1),
            KeyCode::Char('w') => self.view = self.view.panned(0.0, 0.1),
            KeyCode::Char('s') => self.view = self.view.panned(0.0, -0.1),
            KeyCode::Char('a') => self.view = self.view.panned(-0.1, 0.0),
            KeyCode::Char('d') => self.view = self.view.panned(0.1, 0.0),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected_result + 1 < self.filtered_result_indices.len() {
                    self.selected_result += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_result = self.selected_result.saturating_sub(1);
            }
            KeyCode::Char('c') => self.center_on_selected(),
            KeyCode::Char('/') => {
                self.current_mode = AppMode::Searching;
                self.previous_search_query_buffer.clone_from(&self.search_query_buffer);
                self.search_query_cursor = self.search_query_buffer.len();
                self.notify("Enter search query. Press Enter to apply, Escape to cancel.");
            }
            KeyCode::Char('p') => self.toggle_kind(GeometryKind::Point),
            KeyCode::Char('l') => self.toggle_kind(GeometryKind::Line),
            KeyCode::Char('o') => self.toggle_kind(GeometryKind::Polygon),
            KeyCode::Char('f') => self.cycle_folder(),
            KeyCode::Char('g') => self.toggle_model(),
            KeyCode::Char('b') => {
                self.basemap = self.basemap.next();
                self.notify(format!("Basemap: {}", self.basemap.label()));
            }
            KeyCode::Char('e') => self.export(ExportFormat::Csv),
            KeyCode::Char('E') => self.export(ExportFormat::Geojson),
            KeyCode::Char('K') => self.export(ExportFormat::Kml),
            KeyCode::Char('m') => self.save_plot(),
            KeyCode::Char('x') => self.reset(),
            KeyCode::Char('r') => self.load_master(false),
            KeyCode::Char('R') => self.load_master(true),
            _ => {}
        }
    }

    fn handle_location_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                self.current_mode = AppMode::Navigation;
                self.analyze_typed_location();
            }
            KeyCode::Esc => {
                self.location_buffer.clone_from(&self.previous_location_buffer);
                self.location_cursor = self.location_buffer.len();
                self.current_mode = AppMode::Navigation;
                self.notify("Location editing cancelled. Reverted to previous.");
            }
            code => edit_buffer(&mut self.location_buffer, &mut self.location_cursor, code),
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                if self.search_query_buffer.is_empty() {
                    self.notify("Search cleared. Showing all results.");
                } else {
                    self.notify(format!(
                        "Searching for: '{}' ({} results)",
                        self.search_query_buffer,
                        self.filtered_result_indices.len()
                    ));
                }
                self.current_mode = AppMode::Navigation;
            }
            KeyCode::Esc => {
                self.search_query_buffer.clone_from(&self.previous_search_query_buffer);
                self.search_query_cursor = self.search_query_buffer.len();
                self.selected_result = 0;
                self.refilter_results();
                self.current_mode = AppMode::Navigation;
                self.notify("Search cancelled.");
            }
            code => {
                edit_buffer(&mut self.search_query_buffer, &mut self.search_query_cursor, code);
                self.refilter_results();
            }
        }
    }

    fn divider_column(&self) -> u16 {
        self.content_area.x
            + (self.content_area.width as u32 * self.left_pane_width_percentage as u32 / 100) as u16
    }

    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let divider = self.divider_column();
                let on_divider = self.content_area.width > 0
                    && mouse.column.abs_diff(divider) <= 1
                    && mouse.row >= self.content_area.y
                    && mouse.row < self.content_area.y + self.content_area.height;
                if on_divider {
                    self.is_resizing = true;
                    return;
                }
                if self.current_mode != AppMode::Navigation || self.current_screen != CurrentScreen::Dashboard {
                    return;
                }
                if let Some((lon, lat)) = self.view.cell_to_lon_lat(self.map_area, mouse.column, mouse.row) {
                    match QueryPoint::new(lat, lon) {
                        Ok(point) => self.run_analysis(point, QuerySource::MapClick),
                        Err(e) => self.notify_error(format!("Error: {}", e)),
                    }
                }
            }
            MouseEventKind::Drag(MouseButton::Left) if self.is_resizing => {
                if self.content_area.width > 0 {
                    let offset = mouse.column.saturating_sub(self.content_area.x) as u32;
                    let percentage = (offset * 100 / self.content_area.width as u32) as u16;
                    self.left_pane_width_percentage = percentage.clamp(20, 80);
                }
            }
            MouseEventKind::Up(MouseButton::Left) => self.is_resizing = false,
            MouseEventKind::ScrollUp => self.view = self.view.zoomed(1),
            MouseEventKind::ScrollDown => self.view = self.view.zoomed(-1),
            _ => {}
        }
    }
}

/// Applies an editing key to a single-line text buffer.
fn edit_buffer(buffer: &mut String, cursor: &mut usize, code: KeyCode) {
    if *cursor > buffer.len() {
        *cursor = buffer.len();
    }
    match code {
        KeyCode::Char(c) if c.is_ascii() && !c.is_ascii_control() => {
            buffer.insert(*cursor, c);
            *cursor += 1;
        }
        KeyCode::Left => *cursor = cursor.saturating_sub(1),
        KeyCode::Right => {
            if *cursor < buffer.len() {
                *cursor += 1;
            }
        }
        KeyCode::Home => *cursor = 0,
        KeyCode::End => *cursor = buffer.len(),
        KeyCode::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                buffer.remove(*cursor);
            }
        }
        KeyCode::Delete => {
            if *cursor < buffer.len() {
                buffer.remove(*cursor);
            }
        }
        _ => {}
    }
}

// Basic fuzzy matching function
pub fn fuzzy_match(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() {
        return true; // Empty pattern matches everything
    }

    let pattern_lower = pattern.to_lowercase(); // Case-insensitive search
    let text_lower = text.to_lowercase();

    let mut text_chars = text_lower.chars();
    pattern_lower
        .chars()
        .all(|p_char| text_chars.any(|t_char| t_char == p_char))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fs;
    use std::time::Duration;

    const KML: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document>
      <Folder><name>Wells</name>
        <Placemark><name>Well A</name><Point><coordinates>106.816666,-6.227027</coordinates></Point></Placemark>
        <Placemark><name>Well B</name><Point><coordinates>106.816666,-6.272072</coordinates></Point></Placemark>
      </Folder>
      <Folder><name>Roads</name>
        <Placemark><name>Ring Road</name>
          <LineString><coordinates>106.7,-6.19 106.9,-6.19</coordinates></LineString>
        </Placemark>
      </Folder>
    </Document></kml>"#;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
    }

    fn app_with(kml_path: PathBuf, output_dir: PathBuf) -> App {
        App::new(AppSettings {
            kml_path,
            output_dir,
            cache: LoadCache::new(Duration::from_secs(3600)),
            index_threshold: 256,
            lat: -6.2,
            lon: 106.816666,
            radius_km: 5.0,
        })
    }

    fn loaded_app() -> (tempfile::TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("master.kml");
        fs::write(&path, KML).unwrap();
        let mut app = app_with(path, dir.path().join("output"));
        app.load_master(false);
        (dir, app)
    }

    fn result_names(app: &App) -> Vec<String> {
        let collection = app.collection.as_ref().unwrap();
        app.visible_results()
            .iter()
            .map(|r| collection.features[r.index].display_name().to_string())
            .collect()
    }

    #[test]
    fn typed_location_runs_analysis() {
        let (_dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Char('i')));
        assert_eq!(app.current_mode, AppMode::EditingLocation);
        for _ in 0..40 {
            app.handle_key(key(KeyCode::Backspace));
        }
        type_text(&mut app, "-6.2, 106.816666");
        app.handle_key(key(KeyCode::Enter));

        assert_eq!(app.current_mode, AppMode::Navigation);
        let analysis = app.analysis.as_ref().expect("analysis ran");
        assert_eq!(analysis.source, QuerySource::Manual);
        assert_eq!(result_names(&app), vec!["Ring Road", "Well A"]);
    }

    #[test]
    fn radius_change_reruns_the_same_point() {
        let (_dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(result_names(&app).len(), 2);
        for _ in 0..4 {
            app.handle_key(key(KeyCode::Char(']')));
        }
        assert_eq!(app.radius_km, 9.0);
        assert_eq!(result_names(&app), vec!["Ring Road", "Well A", "Well B"]);
    }

    #[test]
    fn radius_is_clamped_to_slider_range() {
        let (_dir, mut app) = loaded_app();
        for _ in 0..10 {
            app.handle_key(key(KeyCode::Char('[')));
        }
        assert_eq!(app.radius_km, MIN_RADIUS_KM);
        app.set_radius(500.0);
        assert_eq!(app.radius_km, MAX_RADIUS_KM);
    }

    #[test]
    fn escape_reverts_location_edit() {
        let (_dir, mut app) = loaded_app();
        let before = app.location_buffer.clone();
        app.handle_key(key(KeyCode::Char('i')));
        type_text(&mut app, "999");
        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.location_buffer, before);
        assert!(app.analysis.is_none());
    }

    #[test]
    fn invalid_typed_location_is_reported() {
        let (_dir, mut app) = loaded_app();
        app.location_buffer = String::from("95, 10");
        app.handle_key(key(KeyCode::Enter));
        assert!(app.analysis.is_none());
        assert!(app.notification_is_error);
    }

    #[test]
    fn folder_filter_cycles_and_reruns() {
        let (_dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        // folders are sorted: Roads, Wells
        app.handle_key(key(KeyCode::Char('f')));
        assert_eq!(app.folder_label(), "Roads");
        assert_eq!(result_names(&app), vec!["Ring Road"]);
        app.handle_key(key(KeyCode::Char('f')));
        assert_eq!(result_names(&app), vec!["Well A"]);
        app.handle_key(key(KeyCode::Char('f')));
        assert_eq!(app.folder_label(), "All");
        assert_eq!(result_names(&app).len(), 2);
    }

    #[test]
    fn kind_toggle_hides_lines() {
        let (_dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Char('l')));
        assert_eq!(result_names(&app), vec!["Well A"]);
    }

    #[test]
    fn search_filters_results_and_escape_restores() {
        let (_dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Char('/')));
        type_text(&mut app, "wla");
        assert_eq!(result_names(&app), vec!["Well A"]);
        app.handle_key(key(KeyCode::Esc));
        assert_eq!(result_names(&app).len(), 2);
    }

    #[test]
    fn reset_clears_analysis() {
        let (_dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Char('x')));
        assert!(app.analysis.is_none());
        assert!(app.visible_results().is_empty());
    }

    #[test]
    fn missing_master_file_blocks_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_with(dir.path().join("missing.kml"), dir.path().to_path_buf());
        app.load_master(false);
        assert!(app.load_error.is_some());
        app.handle_key(key(KeyCode::Enter));
        assert!(app.analysis.is_none());
        assert!(app.notification.starts_with("No data loaded"));
    }

    #[test]
    fn map_click_queries_the_clicked_point() {
        let (_dir, mut app) = loaded_app();
        app.map_area = Rect::new(0, 0, 100, 50);
        app.view = MapView {
            center_lon: 106.816666,
            center_lat: -6.2,
            zoom: 8,
        };
        app.handle_mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 50,
            row: 25,
            modifiers: KeyModifiers::NONE,
        });
        let analysis = app.analysis.as_ref().expect("click ran an analysis");
        assert_eq!(analysis.source, QuerySource::MapClick);
        assert!((analysis.context.point.lat + 6.2).abs() < 0.05);
        assert!((analysis.context.point.lon - 106.816666).abs() < 0.05);
    }

    #[test]
    fn click_outside_map_is_ignored() {
        let (_dir, mut app) = loaded_app();
        app.map_area = Rect::new(0, 0, 10, 10);
        app.handle_mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 40,
            row: 5,
            modifiers: KeyModifiers::NONE,
        });
        assert!(app.analysis.is_none());
    }

    #[test]
    fn export_writes_csv_into_output_dir() {
        let (dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Char('e')));
        assert!(!app.notification_is_error, "{}", app.notification);
        let written: Vec<_> = fs::read_dir(dir.path().join("output")).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn shift_k_exports_kml_that_loads_back() {
        let (dir, mut app) = loaded_app();
        app.handle_key(key(KeyCode::Enter));
        let expected = result_names(&app);
        assert!(!expected.is_empty());
        app.handle_key(key(KeyCode::Char('K')));
        assert!(!app.notification_is_error, "{}", app.notification);

        let written: Vec<_> = fs::read_dir(dir.path().join("output"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].extension().unwrap(), "kml");
        let collection = crate::loader::load_features(&written[0]).unwrap();
        let names: Vec<String> = collection
            .features
            .iter()
            .map(|f| f.display_name().to_string())
            .collect();
        assert_eq!(names, expected);
        assert!(collection.features.iter().all(|f| f.attributes.contains_key("distance_m")));
    }

    #[test]
    fn view_cell_mapping_covers_the_bounds() {
        let view = MapView {
            center_lon: 0.0,
            center_lat: 0.0,
            zoom: 0,
        };
        let area = Rect::new(10, 5, 36, 18);
        let (lon, lat) = view.cell_to_lon_lat(area, 10, 5).unwrap();
        assert!(lon < -170.0 && lat > 80.0);
        let (lon, lat) = view.cell_to_lon_lat(area, 45, 22).unwrap();
        assert!(lon > 170.0 && lat < -80.0);
        assert!(view.cell_to_lon_lat(area, 46, 5).is_none());
    }

    #[test]
    fn cell_mapping_wraps_past_the_antimeridian() {
        let view = MapView {
            center_lon: 180.0,
            center_lat: 90.0,
            zoom: 0,
        }
        .panned(0.5, 0.5);
        assert_eq!((view.center_lon, view.center_lat), (180.0, 90.0));
        let area = Rect::new(0, 0, 36, 18);
        for (column, row) in [(0, 0), (18, 9), (35, 0), (35, 17)] {
            let (lon, lat) = view.cell_to_lon_lat(area, column, row).unwrap();
            assert!((-180.0..180.0).contains(&lon), "lon {} at {:?}", lon, (column, row));
            assert!((-90.0..=90.0).contains(&lat), "lat {} at {:?}", lat, (column, row));
        }
        let (lon, lat) = view.cell_to_lon_lat(area, 35, 0).unwrap();
        assert_relative_eq!(lon, -5.0, epsilon = 1e-9);
        assert_eq!(lat, 90.0);
    }

    #[test]
    fn click_east_of_the_antimeridian_queries_the_wrapped_point() {
        let (_dir, mut app) = loaded_app();
        app.map_area = Rect::new(0, 0, 36, 18);
        app.view = MapView {
            center_lon: 180.0,
            center_lat: 0.0,
            zoom: 0,
        };
        app.handle_mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 35,
            row: 9,
            modifiers: KeyModifiers::NONE,
        });
        assert!(!app.notification_is_error, "{}", app.notification);
        let analysis = app.analysis.as_ref().expect("click ran an analysis");
        assert_eq!(analysis.source, QuerySource::MapClick);
        assert_relative_eq!(analysis.context.point.lon, -5.0, epsilon = 1e-9);
        assert_relative_eq!(analysis.context.point.lat, -5.0, epsilon = 1e-9);
    }

    #[test]
    fn zoom_is_clamped() {
        let view = MapView::default().zoomed(-3);
        assert_eq!(view.zoom, 0);
        assert_eq!(view.zoomed(100).zoom, MapView::MAX_ZOOM);
    }

    #[test]
    fn fuzzy_match_is_ordered_and_case_insensitive() {
        assert!(fuzzy_match("", "anything"));
        assert!(fuzzy_match("rr", "Ring Road"));
        assert!(fuzzy_match("WLA", "well a"));
        assert!(!fuzzy_match("ar", "Ring Road Z"));
        assert!(!fuzzy_match("zz", "Ring Road"));
    }
}
