// main.rs

use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing_subscriber::{EnvFilter, fmt, fmt::writer::BoxMakeWriter};

use kml_nearby_mapper::{
    app::{App, AppSettings},
    cache::LoadCache,
    config::{BatchArgs, Command, Config, DmsArgs, PlotArgs, QueryArgs, TuiArgs},
    coords::{QueryPoint, dms_to_decimal},
    event::{Event, EventHandler},
    export,
    features::{CollectionInfo, FeatureCollection, geometry_type_name},
    loader,
    nearby::{self, FeatureFilter, QueryContext, SpatialIndex},
    plot::{self, PlotOptions},
    ui,
};

const LOG_FILE: &str = "kml-nearby-mapper.log";
const TICK_RATE: Duration = Duration::from_millis(250);

fn init_logging(json: bool, writer: BoxMakeWriter, ansi: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(writer).with_ansi(ansi);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let command = config
        .command
        .clone()
        .unwrap_or_else(|| Command::Tui(TuiArgs::default()));

    // The dashboard owns the terminal, so it logs to a file instead.
    if !matches!(command, Command::Tui(_)) {
        init_logging(config.json_logs, BoxMakeWriter::new(io::stderr), true);
        tracing::debug!(config = ?config, "starting");
    }
    match command {
        Command::Tui(args) => run_tui(&config, args),
        Command::Query(args) => run_query(&config, args),
        Command::Batch(args) => run_batch(&config, args),
        Command::Info => run_info(&config),
        Command::Plot(args) => run_plot(&config, args),
        Command::Dms(args) => {
            run_dms(args);
            Ok(())
        }
    }
}

fn load(config: &Config) -> anyhow::Result<(FeatureCollection, Option<SpatialIndex>)> {
    let collection = loader::load_features(&config.kml)
        .with_context(|| format!("failed to load {}", config.kml.display()))?;
    let index = SpatialIndex::build_if_large(&collection, config.index_threshold);
    Ok((collection, index))
}

fn run_query(config: &Config, args: QueryArgs) -> anyhow::Result<()> {
    let (collection, index) = load(config)?;
    let point = QueryPoint::new(args.lat, args.lon)?;
    let ctx = QueryContext::new(point, args.radius_km)?
        .with_model(args.model)
        .with_filter(FeatureFilter::default().with_folders(args.folders));
    let results = nearby::find_nearby(&collection, &ctx, index.as_ref());

    if results.is_empty() {
        println!("No features found within {} km of {}", ctx.radius_km, point);
    } else {
        println!(
            "{} features within {} km of {} ({})",
            results.len(),
            ctx.radius_km,
            point,
            ctx.model.label()
        );
        println!("{:>4}  {:<40} {:>14}  {:<16} {}", "#", "Name", "Distance (m)", "Type", "Folder");
        for (rank, result) in results.iter().enumerate() {
            let feature = &collection.features[result.index];
            println!(
                "{:>4}  {:<40} {:>14.1}  {:<16} {}",
                rank + 1,
                feature.display_name(),
                result.distance_m,
                feature.geometry.as_ref().map(geometry_type_name).unwrap_or("-"),
                feature.folder.as_deref().unwrap_or("")
            );
        }
    }

    if let Some(output) = args.output {
        export::export_results(&output, args.format, &collection, &results)?;
        println!("Results written to {}", output.display());
    }
    Ok(())
}

fn run_batch(config: &Config, args: BatchArgs) -> anyhow::Result<()> {
    let (collection, index) = load(config)?;
    let points = export::read_points_csv(&args.points)
        .with_context(|| format!("failed to read points from {}", args.points.display()))?;
    let results =
        nearby::batch_analysis(&collection, &points, args.radius_km, args.model, index.as_ref())?;

    let output = match args.output {
        Some(path) => path,
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            config.output_dir.join(format!("batch_results_{}.csv", stamp))
        }
    };
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = fs::File::create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    export::write_batch_csv(file, &results)?;

    let with_hits = results.iter().filter(|r| r.features_found > 0).count();
    tracing::info!(points = results.len(), with_hits, "batch finished");
    println!(
        "Processed {} locations ({} with nearby features). Summary written to {}",
        results.len(),
        with_hits,
        output.display()
    );
    Ok(())
}

fn run_info(config: &Config) -> anyhow::Result<()> {
    let (collection, _) = load(config)?;
    let info = CollectionInfo::gather(&config.kml, &collection)?;
    println!("File: {}", config.kml.display());
    for line in info.lines() {
        println!("{}", line);
    }
    for folder in &info.folders {
        println!("  - {}", folder);
    }
    Ok(())
}

fn run_plot(config: &Config, args: PlotArgs) -> anyhow::Result<()> {
    let (collection, index) = load(config)?;
    let ctx = QueryContext::new(QueryPoint::new(args.lat, args.lon)?, args.radius_km)?
        .with_model(args.model)
        .with_filter(FeatureFilter::default().with_folders(args.folders));
    let results = nearby::find_nearby(&collection, &ctx, index.as_ref());

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    let path = config.output_dir.join(&args.output);
    plot::render_png(&path, &collection, Some(&ctx), &results, &PlotOptions::default())?;
    println!("Plot saved to {} ({} nearby features)", path.display(), results.len());
    Ok(())
}

fn run_dms(args: DmsArgs) {
    let decimal = dms_to_decimal(args.degrees, args.minutes, args.seconds, args.direction);
    println!("{:.6}", decimal);
}

fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture)
}

fn run_tui(config: &Config, args: TuiArgs) -> anyhow::Result<()> {
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    let log_path = config.output_dir.join(LOG_FILE);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;
    init_logging(config.json_logs, BoxMakeWriter::new(Mutex::new(log_file)), false);
    tracing::info!(kml = %config.kml.display(), "starting dashboard");

    let mut app = App::new(AppSettings {
        kml_path: config.kml.clone(),
        output_dir: config.output_dir.clone(),
        cache: LoadCache::new(config.cache_ttl()),
        index_threshold: config.index_threshold,
        lat: args.lat,
        lon: args.lon,
        radius_km: args.radius_km,
    });
    app.load_master(false);

    // Leave the terminal usable if drawing panics.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        default_hook(info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = run_app(&mut terminal, &mut app);

    restore_terminal()?;
    terminal.show_cursor()?;
    tracing::info!("dashboard closed");
    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    let events = EventHandler::new(TICK_RATE);
    while !app.should_quit {
        terminal.draw(|frame| ui::render(frame, app))?;
        match events.next(TICK_RATE).context("terminal input stopped")? {
            Some(Event::Input(key)) => app.handle_key(key),
            Some(Event::Mouse(mouse)) => app.handle_mouse(mouse),
            // the next draw picks up the new size
            Some(Event::TerminalEvent(_)) | Some(Event::Tick) | None => {}
        }
    }
    Ok(())
}
