// src/main.rs
//! NMEA Tracker - watch a GPS stream, check geofences and record tracks

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use nmea_tracker::{
    config::{self, AppConfig},
    export::{self, TrackFormat},
    geo::LatLng,
    geofence::{Geofence, GeofenceAlert, GeofenceSet, GeofenceShape},
    gps::{framer::TERMINATOR, serial, PositionFix, SentenceSimulator, SimulatorOptions},
    monitor::{run_event_loop, GpsMonitor, GpsSource, SourceEvent},
    store::{JsonFileStore, Store},
    track::{self, Track, TrackStats},
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const EVENT_QUEUE: usize = 256;
const PARSE_CHUNK: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "nmea-tracker", version, about = "NMEA-0183 position tracker with geofences")]
struct Cli {
    /// Log level when RUST_LOG is not set (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow a live source, printing fixes and geofence alerts
    Run(RunArgs),

    /// Frame and parse a capture file, printing every fix
    Parse {
        /// File with raw NMEA sentences
        file: PathBuf,
    },

    /// List serial ports
    Ports,

    /// Manage recorded tracks
    Tracks {
        #[command(subcommand)]
        command: TrackCommands,
    },

    /// Manage geofences
    Geofences {
        #[command(subcommand)]
        command: GeofenceCommands,
    },

    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Simulator,
    Serial,
    Replay,
}

impl SourceArg {
    fn as_config(&self) -> &'static str {
        match self {
            SourceArg::Simulator => config::SOURCE_SIMULATOR,
            SourceArg::Serial => config::SOURCE_SERIAL,
            SourceArg::Replay => config::SOURCE_REPLAY,
        }
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Sentence source (defaults to the configured one)
    #[arg(long, value_enum)]
    source: Option<SourceArg>,

    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Capture file for replay
    #[arg(long)]
    file: Option<PathBuf>,

    /// Simulator emission interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Simulator start position
    #[arg(long, num_args = 2, value_names = ["LAT", "LNG"], allow_negative_numbers = true)]
    start: Option<Vec<f64>>,

    /// Record a track with this name
    #[arg(long)]
    record: Option<String>,

    /// Also export the recorded track here (format from the extension)
    #[arg(long, requires = "record")]
    export: Option<PathBuf>,

    /// Extra geofences from a JSON array file
    #[arg(long)]
    geofences: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[derive(Debug, Subcommand)]
enum TrackCommands {
    /// List stored tracks, oldest first
    List,

    /// Export a stored track
    Export {
        id: String,
        path: PathBuf,

        /// Output format (defaults to the file extension)
        #[arg(long, value_enum)]
        format: Option<TrackFormat>,
    },

    /// Delete a stored track
    Delete { id: String },

    /// Rename a stored track
    Rename { id: String, name: String },
}

#[derive(Debug, Subcommand)]
enum GeofenceCommands {
    /// List stored geofences
    List,

    /// Add a circular geofence
    AddCircle {
        #[arg(long)]
        name: String,

        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        /// Radius in meters
        #[arg(long)]
        radius: f64,

        /// Id to store under (random when omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        color: Option<String>,
    },

    /// Delete a stored geofence
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the active configuration
    Show,

    /// Change the default source
    SetSource {
        #[arg(value_enum)]
        source: SourceArg,

        #[arg(long)]
        port: Option<String>,

        #[arg(long)]
        baud: Option<u32>,

        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries fixes and listings
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::config_path()?,
    };
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match cli.command {
        Command::Run(args) => run(&config, args).await,
        Command::Parse { file } => parse_file(&file),
        Command::Ports => list_ports(),
        Command::Tracks { command } => tracks_command(&config, command),
        Command::Geofences { command } => geofences_command(&config, command),
        Command::Config { command } => config_command(config, &config_path, command),
    }
}

fn resolve_source(config: &AppConfig, args: &RunArgs) -> anyhow::Result<GpsSource> {
    let source_type = args
        .source
        .map(|s| s.as_config())
        .unwrap_or(config.source_type.as_str());

    let source = match source_type {
        config::SOURCE_SERIAL => {
            let port = args
                .port
                .clone()
                .or_else(|| config.serial_port.clone())
                .context("no serial port given; pass --port or set one with `config set-source serial`")?;
            GpsSource::Serial {
                port,
                baudrate: args.baud.unwrap_or(config.serial_baudrate),
            }
        }
        config::SOURCE_REPLAY => {
            let path = args
                .file
                .clone()
                .or_else(|| config.replay_file.clone())
                .context("no replay file given; pass --file")?;
            GpsSource::Replay {
                path,
                interval_ms: args.interval_ms.or(Some(config.simulator_interval_ms)),
            }
        }
        config::SOURCE_SIMULATOR => {
            let start_position = match &args.start {
                Some(pair) => Some(LatLng::new(pair[0], pair[1])),
                None => config.simulator_start(),
            };
            GpsSource::Simulator(SimulatorOptions {
                interval_ms: Some(args.interval_ms.unwrap_or(config.simulator_interval_ms)),
                start_position,
                ..SimulatorOptions::default()
            })
        }
        other => bail!("unknown source type '{}' in config", other),
    };

    Ok(source)
}

fn load_geofences(config: &AppConfig, extra: Option<&Path>) -> anyhow::Result<GeofenceSet> {
    let store: JsonFileStore<Geofence> = JsonFileStore::new(config.geofences_dir()?);
    let mut set = GeofenceSet::from_geofences(store.list()?);

    if let Some(path) = extra {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let geofences: Vec<Geofence> =
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        for geofence in geofences {
            let id = geofence.id.clone();
            if let Err(e) = set.add(geofence) {
                warn!("Skipping geofence {}: {}", id, e);
            }
        }
    }

    info!("Loaded {} geofences", set.len());
    Ok(set)
}

async fn run(config: &AppConfig, args: RunArgs) -> anyhow::Result<()> {
    let source = resolve_source(config, &args)?;
    let mut monitor = GpsMonitor::with_geofences(load_geofences(config, args.geofences.as_deref())?);
    if let Some(name) = &args.record {
        monitor.recorder_mut().start(name);
    }

    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
    let mut simulator = SentenceSimulator::new();

    match source {
        GpsSource::Serial { port, baudrate } => {
            let id = monitor.connect(&port);
            let reader = serial::spawn_serial_reader(&port, baudrate, id, tx.clone())?;
            monitor.attach_reader(id, reader)?;
        }
        GpsSource::Simulator(options) => {
            simulator.start(options)?;
            let (_, mut lines) = simulator.subscribe();
            let id = monitor.connect("simulator");
            let tx = tx.clone();
            // Synthetic output goes through the same framing as a device
            let forwarder = tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    let data = format!("{}{}", line, TERMINATOR).into_bytes();
                    if tx.send(SourceEvent::Chunk { connection: id, data }).await.is_err() {
                        break;
                    }
                }
            });
            monitor.attach_reader(id, forwarder)?;
        }
        GpsSource::Replay { path, interval_ms } => {
            let contents =
                std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            if simulator.load_file(&contents) == 0 {
                bail!("{} contains no GGA, RMC or VTG sentences", path.display());
            }
            simulator.start(SimulatorOptions {
                interval_ms,
                ..SimulatorOptions::default()
            })?;
            let (_, mut lines) = simulator.subscribe();
            let id = monitor.connect(&path.display().to_string());
            let tx = tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    if tx.send(SourceEvent::Sentence(line)).await.is_err() {
                        break;
                    }
                }
            });
            monitor.attach_reader(id, forwarder)?;
        }
    }
    drop(tx);

    let stop_after = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = run_event_loop(&mut monitor, &mut rx, print_fix) => info!("Sources closed"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = stop_after => info!("Run time elapsed"),
    }
    simulator.stop();
    monitor.disconnect_all();

    let stats = monitor.stats();
    println!(
        "{} sentences, {} fixes, {} unknown, {} rejected",
        stats.sentences, stats.fixes, stats.unknown, stats.rejected
    );

    if let Some(track) = monitor.recorder_mut().finish() {
        save_track(config, &track, args.export.as_deref())?;
    }

    Ok(())
}

fn save_track(config: &AppConfig, track: &Track, export_path: Option<&Path>) -> anyhow::Result<()> {
    if track.is_empty() {
        println!("Track '{}' has no points, not saved", track.name);
        return Ok(());
    }

    let mut store: JsonFileStore<Track> = JsonFileStore::new(config.tracks_dir()?);
    store.put(track)?;

    let stats = TrackStats::from_track(track);
    println!(
        "Saved track '{}' ({}): {} points, {:.2} km, {}",
        track.name,
        track.id,
        stats.points,
        stats.distance_km,
        stats.format_duration()
    );

    if let Some(path) = export_path {
        let format = TrackFormat::from_path(path)
            .with_context(|| format!("cannot tell export format from {}", path.display()))?;
        export::export_to_file(track, path, format)?;
        println!("Exported {} to {}", format.display_name(), path.display());
    }

    Ok(())
}

fn print_fix(fix: &PositionFix, alerts: &[GeofenceAlert]) {
    let mut line = format!(
        "{} {} {} alt {} spd {} hdg {} sats {}",
        fix.timestamp.format("%Y-%m-%d %H:%M:%S"),
        PositionFix::format_coordinate(fix.latitude),
        PositionFix::format_coordinate(fix.longitude),
        PositionFix::format_value(fix.altitude.map(|v| format!("{:.1}", v)), "m"),
        PositionFix::format_value(fix.speed.map(|v| format!("{:.1}", v)), "km/h"),
        PositionFix::format_value(fix.heading.map(|v| format!("{:.0}", v)), "°"),
        PositionFix::format_value(fix.satellites, ""),
    );
    if !alerts.is_empty() {
        let names: Vec<&str> = alerts.iter().map(|a| a.name.as_str()).collect();
        line.push_str(&format!(" inside [{}]", names.join(", ")));
    }
    println!("{}", line);
}

fn parse_file(path: &Path) -> anyhow::Result<()> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    // Captures saved with bare LF still need the wire terminator
    let mut normalized = contents.replace("\r\n", "\n").replace('\n', TERMINATOR);
    if !normalized.ends_with(TERMINATOR) {
        normalized.push_str(TERMINATOR);
    }

    let mut monitor = GpsMonitor::new();
    let id = monitor.connect(&path.display().to_string());
    for chunk in normalized.as_bytes().chunks(PARSE_CHUNK) {
        for fix in monitor.feed(id, chunk)? {
            print_fix(&fix, &[]);
        }
    }
    monitor.disconnect(id);

    let stats = monitor.stats();
    println!(
        "{} sentences, {} fixes, {} unknown, {} rejected",
        stats.sentences, stats.fixes, stats.unknown, stats.rejected
    );
    Ok(())
}

fn list_ports() -> anyhow::Result<()> {
    let ports = serial::list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in ports {
            println!("  {}", port);
        }
    }
    Ok(())
}

fn tracks_command(config: &AppConfig, command: TrackCommands) -> anyhow::Result<()> {
    let mut store: JsonFileStore<Track> = JsonFileStore::new(config.tracks_dir()?);

    match command {
        TrackCommands::List => {
            let tracks = track::tracks_by_date(&store)?;
            if tracks.is_empty() {
                println!("No tracks recorded.");
            }
            for track in tracks {
                let stats = TrackStats::from_track(&track);
                println!(
                    "{}  {}  {:<24} {:>6} pts {:>9.2} km  {}",
                    track.id,
                    track.started_at.format("%Y-%m-%d %H:%M"),
                    track.name,
                    stats.points,
                    stats.distance_km,
                    stats.format_duration()
                );
            }
        }
        TrackCommands::Export { id, path, format } => {
            let track = store.get(&id)?.with_context(|| format!("no track with id {}", id))?;
            let format = match format.or_else(|| TrackFormat::from_path(&path)) {
                Some(format) => format,
                None => bail!("cannot tell export format from {}; pass --format", path.display()),
            };
            export::export_to_file(&track, &path, format)?;
            println!("Exported '{}' as {} to {}", track.name, format.display_name(), path.display());
        }
        TrackCommands::Delete { id } => {
            if !store.delete(&id)? {
                bail!("no track with id {}", id);
            }
            println!("Deleted track {}", id);
        }
        TrackCommands::Rename { id, name } => {
            let mut track = store.get(&id)?.with_context(|| format!("no track with id {}", id))?;
            track.rename(&name);
            store.put(&track)?;
            println!("Renamed track {} to '{}'", id, track.name);
        }
    }

    Ok(())
}

fn geofences_command(config: &AppConfig, command: GeofenceCommands) -> anyhow::Result<()> {
    let mut store: JsonFileStore<Geofence> = JsonFileStore::new(config.geofences_dir()?);

    match command {
        GeofenceCommands::List => {
            let geofences = store.list()?;
            if geofences.is_empty() {
                println!("No geofences defined.");
            }
            for geofence in geofences {
                let detail = match &geofence.shape {
                    GeofenceShape::Circle { center, radius } => {
                        format!("{:.6}, {:.6} r={:.0} m", center.lat, center.lng, radius)
                    }
                    GeofenceShape::Polygon { vertices } | GeofenceShape::Rectangle { vertices } => {
                        format!("{} vertices", vertices.len())
                    }
                };
                println!(
                    "{}  {:<20} {:<9} {}  {}",
                    geofence.id,
                    geofence.name,
                    geofence.shape.kind(),
                    detail,
                    geofence.color
                );
            }
        }
        GeofenceCommands::AddCircle {
            name,
            lat,
            lng,
            radius,
            id,
            color,
        } => {
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if store.get(&id)?.is_some() {
                bail!("a geofence with id {} already exists", id);
            }

            let shape = GeofenceShape::Circle {
                center: LatLng::new(lat, lng),
                radius,
            };
            shape.validate()?;

            let mut geofence = Geofence::new(id, name, shape);
            if let Some(color) = color {
                geofence = geofence.with_color(color);
            }
            store.put(&geofence)?;
            println!("Added geofence '{}' ({})", geofence.name, geofence.id);
        }
        GeofenceCommands::Delete { id } => {
            if !store.delete(&id)? {
                bail!("no geofence with id {}", id);
            }
            println!("Deleted geofence {}", id);
        }
    }

    Ok(())
}

fn config_command(mut config: AppConfig, path: &Path, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommands::SetSource {
            source,
            port,
            baud,
            file,
            interval_ms,
        } => {
            match source {
                SourceArg::Serial => {
                    let port = port
                        .or_else(|| config.serial_port.clone())
                        .context("serial source needs --port")?;
                    config.update_serial(port, baud.unwrap_or(config.serial_baudrate));
                }
                SourceArg::Replay => {
                    let file = file
                        .or_else(|| config.replay_file.clone())
                        .context("replay source needs --file")?;
                    config.update_replay(file);
                }
                SourceArg::Simulator => {
                    let start = config.simulator_start();
                    config.update_simulator(interval_ms.unwrap_or(config.simulator_interval_ms), start);
                }
            }
            config.save_to(path)?;
            println!("Source set to {}", config.source_type);
        }
    }

    Ok(())
}
