//! hybris-location daemon.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use hybris_location::clock::SystemClock;
use hybris_location::config::{self, Config};
use hybris_location::engine::{self, EngineKind};
use hybris_location::event;
use hybris_location::lifecycle;
use hybris_location::logging;
use hybris_location::network::StaticNetwork;
use hybris_location::ntp::UdpNtpTransport;
use hybris_location::policy::{DeviceControl, IniSettingsSource};
use hybris_location::provider::{Collaborators, LocationProvider};
use hybris_location::runtime::EventLoop;
use hybris_location::server::BusServer;
use hybris_location::xtra::HttpXtraFetcher;

#[derive(Parser)]
#[command(name = "hybris-location")]
#[command(about = "GNSS location provider daemon", long_about = None)]
struct Args {
    /// GNSS configuration file (XTRA and NTP servers)
    #[arg(long, default_value = config::DEFAULT_GPS_CONF)]
    config: PathBuf,

    /// Bus socket path
    #[arg(long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    /// PID file path
    #[arg(long, default_value = config::DEFAULT_PID_PATH)]
    pid_file: String,

    /// Location settings file
    #[arg(long, default_value = config::DEFAULT_LOCATION_SETTINGS)]
    location_settings: PathBuf,

    /// Engine backend
    #[arg(long, value_enum, default_value = "auto")]
    engine: EngineKind,

    /// Start with the device powered on
    #[arg(long)]
    powered: bool,

    /// Fork into the background
    #[arg(long)]
    daemon: bool,

    /// Write logs to <DIR>/daemon.log instead of stderr
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init_logging(args.log_dir.as_deref()) {
        eprintln!("Error initialising logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        error!(error = %format!("{:#}", e), "Location provider failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config {
        socket_path: config::expand_tilde(&args.socket),
        pid_path: config::expand_tilde(&args.pid_file),
        location_settings_path: args.location_settings,
        gps_conf_path: args.config,
        engine: args.engine,
        ..Config::default()
    }
    .load_gps_conf()
    .context("Failed to load GNSS configuration")?;

    lifecycle::cleanup_socket(&config.socket_path, Some(config.pid_path.as_path()))?;

    if args.daemon {
        lifecycle::daemonize(&config.pid_path)?;
    } else {
        lifecycle::write_pid_file(&config.pid_path)?;
    }

    let (events, receiver) = event::channel();
    let server = BusServer::bind(&config.socket_path)?;

    let engine = engine::open(config.engine, Path::new("/"));
    if let Ok(engine) = &engine {
        info!(engine = engine.name(), "Opened GNSS engine");
    }

    let parts = Collaborators {
        engine,
        settings: Box::new(IniSettingsSource::new(&config.location_settings_path)),
        device: DeviceControl::new(args.powered),
        network: Box::new(StaticNetwork::new(config.gps.ntp_servers.clone(), events.clone())),
        ntp_transport: Box::new(UdpNtpTransport::new(events.clone())),
        xtra_fetcher: Box::new(HttpXtraFetcher::new(events.clone())?),
        clock: Arc::new(SystemClock),
        signals: Box::new(server.broadcaster()),
    };
    let provider = LocationProvider::new(parts, &config.gps, events.clone());

    lifecycle::install_shutdown_handler(events.clone())?;
    let mut handle = server.spawn(events)?;
    info!(
        socket = %handle.socket_path().display(),
        pid = std::process::id(),
        "Location provider started"
    );

    let mut event_loop = EventLoop::new(provider, receiver);
    event_loop.run();

    handle.shutdown();
    lifecycle::cleanup_files(&config.socket_path, Some(config.pid_path.as_path()));
    if event_loop.provider().should_quit() {
        info!("Exited after idle timeout");
    } else if !event_loop.is_running() {
        info!("Stopped on request");
    } else if event_loop.is_running() {
        warn!("Event queue closed unexpectedly");
    }
    Ok(())
}
