//! CLI entry point for rover-gpr.
//!
//! Three ways to run the system:
//! - `serve`: the HTTP control daemon used in the field (start/cancel scans,
//!   read position, pulse the sprayer).
//! - `scan`: drive one pattern and exit, without the HTTP layer.
//! - `sweep`: capture instrument sweeps without moving the vehicle, for
//!   bench checks of the instrument chain.
//!
//! `--simulate` boots loopback mock servers speaking the real protocols and
//! points the configuration at them, so every subcommand works without
//! hardware attached.
//!
//! # Usage
//!
//! ```bash
//! rover-gpr serve --simulate
//! rover-gpr scan --distance 2.0 --pattern line --record
//! rover-gpr sweep --duration 30s --session bench-check
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rover_gpr::capture::SweepCapture;
use rover_gpr::config::Settings;
use rover_gpr::data::storage::timestamp_name;
use rover_gpr::error::RoverError;
use rover_gpr::hardware::mock::{MockVehicle, MockVna};
use rover_gpr::hardware::{RoverClient, SoftwareSprayer};
use rover_gpr::motion::pattern::Pattern;
use rover_gpr::motion::position::PositionTracker;
use rover_gpr::scan::{self, ScanParams, ScanSupervisor};
use rover_gpr::server::{self, AppState};

#[derive(Parser)]
#[command(name = "rover-gpr")]
#[command(about = "Survey rover and sweep instrument control", long_about = None)]
struct Cli {
    /// Configuration file (defaults to rover.toml in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP control daemon
    Serve {
        /// Use in-process mock hardware instead of real devices
        #[arg(long)]
        simulate: bool,
    },

    /// Drive one scan pattern and exit
    Scan {
        /// Scan distance in meters
        #[arg(long, default_value_t = 1.0)]
        distance: f64,

        /// Pattern to drive
        #[arg(long, value_enum, default_value_t = Pattern::Square)]
        pattern: Pattern,

        /// Record instrument sweeps during a line scan
        #[arg(long)]
        record: bool,

        /// Use in-process mock hardware instead of real devices
        #[arg(long)]
        simulate: bool,
    },

    /// Capture instrument sweeps without driving the vehicle
    Sweep {
        /// Session name (defaults to the current UTC timestamp)
        #[arg(long)]
        session: Option<String>,

        /// Stop after this long, e.g. "30s" (default: run until ctrl-c)
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,

        /// Use in-process mock hardware instead of real devices
        #[arg(long)]
        simulate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::load().context("loading configuration")?,
    };
    settings
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    rover_gpr::logging::init(&settings.log_level).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Serve { simulate } => serve(settings, simulate).await,
        Commands::Scan {
            distance,
            pattern,
            record,
            simulate,
        } => {
            run_scan(
                settings,
                ScanParams {
                    distance,
                    pattern,
                    record,
                },
                simulate,
            )
            .await
        }
        Commands::Sweep {
            session,
            duration,
            simulate,
        } => run_sweep(settings, session, duration, simulate).await,
    }
}

/// Mock servers kept alive for the lifetime of the command.
struct Simulation {
    _vehicle: MockVehicle,
    _vna: MockVna,
}

/// Boot loopback mocks and point the settings at them, keeping the
/// configured sweep and trace selection.
async fn apply_simulation(settings: &mut Settings) -> Result<Simulation> {
    let vehicle = MockVehicle::spawn().await?;
    let vna = MockVna::spawn().await?;

    settings.vehicle = vehicle.vehicle_settings();
    let mut instrument = vna.instrument_settings();
    instrument.sweep = settings.instrument.sweep.clone();
    instrument.trace = settings.instrument.trace.clone();
    instrument.protocol = settings.instrument.protocol;
    settings.instrument = instrument;

    info!(
        vehicle = %settings.vehicle.control_addr(),
        instrument = %settings.instrument.scpi_addr(),
        "simulation servers running"
    );
    Ok(Simulation {
        _vehicle: vehicle,
        _vna: vna,
    })
}

/// A token that fires on ctrl-c.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            trigger.cancel();
        }
    });
    token
}

async fn serve(mut settings: Settings, simulate: bool) -> Result<()> {
    let _sim = if simulate {
        Some(apply_simulation(&mut settings).await?)
    } else {
        None
    };

    // The daemon is useless without the vehicle, so a failed connection
    // aborts startup instead of limping along.
    let rover = Arc::new(
        RoverClient::connect(&settings.vehicle)
            .await
            .context("connecting to the vehicle")?,
    );

    let settings = Arc::new(settings);
    let supervisor = Arc::new(ScanSupervisor::new(rover, settings.clone()));
    let state = AppState {
        supervisor: supervisor.clone(),
        sprayer: Arc::new(SoftwareSprayer::new()),
    };

    let shutdown = shutdown_token();
    server::serve(settings.server.bind, state, shutdown).await?;

    // Never leave a scan running past the daemon
    if let Err(e) = supervisor.cancel().await {
        warn!(error = %e, "cancel on shutdown failed");
    }
    Ok(())
}

async fn run_scan(mut settings: Settings, params: ScanParams, simulate: bool) -> Result<()> {
    let _sim = if simulate {
        Some(apply_simulation(&mut settings).await?)
    } else {
        None
    };

    let rover = Arc::new(
        RoverClient::connect(&settings.vehicle)
            .await
            .context("connecting to the vehicle")?,
    );
    let tracker = Arc::new(RwLock::new(PositionTracker::default()));
    let token = shutdown_token();

    info!(
        distance = params.distance,
        pattern = %params.pattern,
        record = params.record,
        "scan starting"
    );
    match scan::execute(rover, tracker.clone(), &settings, params, &token).await {
        Ok(()) => {}
        Err(RoverError::Cancelled) => info!("scan cancelled"),
        Err(e) => return Err(e).context("scan failed"),
    }

    let report = tracker.read().await.report();
    info!(x = report.x, y = report.y, z = report.z, "scan finished");
    Ok(())
}

async fn run_sweep(
    mut settings: Settings,
    session: Option<String>,
    duration: Option<Duration>,
    simulate: bool,
) -> Result<()> {
    let _sim = if simulate {
        Some(apply_simulation(&mut settings).await?)
    } else {
        None
    };

    let session = session.unwrap_or_else(|| timestamp_name(Utc::now()));
    let capture = SweepCapture::new(settings.instrument.clone(), settings.capture.clone())
        .with_cancellation(shutdown_token());

    match capture.run(&session, duration).await {
        Ok(report) => {
            info!(
                samples = report.samples_written,
                parse_failures = report.parse_failures,
                dir = %report.session_dir.display(),
                "capture finished"
            );
            Ok(())
        }
        Err(RoverError::Cancelled) => {
            info!("capture cancelled");
            Ok(())
        }
        Err(e) => Err(e).context("capture failed"),
    }
}
