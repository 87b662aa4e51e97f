//! Configuration loading using Figment.
//!
//! Settings are loaded from:
//! 1. a TOML file (default `rover.toml` in the working directory)
//! 2. environment variables prefixed with `ROVER_` (double underscore
//!    separates nesting, e.g. `ROVER_VEHICLE__HOST=10.0.0.2`)
//!
//! Every field has a default taken from the deployed survey rig, so an empty
//! file (or no file at all) yields a working configuration pointed at the
//! vehicle's stock address and a local instrument server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Vehicle connection and motion defaults
    #[serde(default)]
    pub vehicle: VehicleSettings,
    /// Sweep instrument connection and sweep parameters
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// Capture pipeline tuning
    #[serde(default)]
    pub capture: CaptureSettings,
    /// HTTP control surface
    #[serde(default)]
    pub server: ServerSettings,
}

/// Vehicle connection and motion defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSettings {
    /// Vehicle address (router mode default)
    #[serde(default = "default_vehicle_host")]
    pub host: String,
    /// Plain-text command port
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Push event port
    #[serde(default = "default_event_port")]
    pub event_port: u16,
    /// How long to wait for a command response before returning the
    /// timeout sentinel
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Requested chassis push frequency in Hz
    #[serde(default = "default_push_frequency")]
    pub push_frequency_hz: u32,
}

impl VehicleSettings {
    /// Control endpoint as `host:port`.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.control_port)
    }

    /// Push event endpoint as `host:port`.
    pub fn event_addr(&self) -> String {
        format!("{}:{}", self.host, self.event_port)
    }
}

/// How trace data is retrieved from the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceProtocol {
    /// Query `:VNA:TRACE:DATA?` on the SCPI port; bracketed reply
    Scpi,
    /// Read semicolon-delimited records pushed on a separate raw port
    Raw,
}

/// Sweep instrument connection and sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Instrument server address
    #[serde(default = "default_instrument_host")]
    pub host: String,
    /// SCPI port of the instrument server
    #[serde(default = "default_instrument_port")]
    pub port: u16,
    /// Raw trace stream port, used when `protocol = "raw"`
    #[serde(default = "default_instrument_port")]
    pub raw_port: u16,
    /// Trace retrieval variant
    #[serde(default = "default_protocol")]
    pub protocol: TraceProtocol,
    /// Trace to capture
    #[serde(default = "default_trace")]
    pub trace: String,
    /// Calibration file to load on the instrument, if any
    #[serde(default)]
    pub calibration_file: Option<PathBuf>,
    /// Response timeout on the SCPI channel
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// Sweep shape applied during the capture preamble
    #[serde(default)]
    pub sweep: SweepSettings,
}

impl InstrumentSettings {
    /// SCPI endpoint as `host:port`.
    pub fn scpi_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Raw trace stream endpoint as `host:port`.
    pub fn raw_addr(&self) -> String {
        format!("{}:{}", self.host, self.raw_port)
    }
}

/// Sweep shape applied during the capture preamble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Sweep start frequency in Hz
    #[serde(default = "default_start_hz")]
    pub start_hz: u64,
    /// Sweep stop frequency in Hz
    #[serde(default = "default_stop_hz")]
    pub stop_hz: u64,
    /// Points per sweep
    #[serde(default = "default_points")]
    pub points: u32,
    /// Sweep averaging factor
    #[serde(default = "default_averages")]
    pub averages: u32,
    /// IF bandwidth in Hz
    #[serde(default = "default_if_bandwidth")]
    pub if_bandwidth_hz: u32,
    /// Stimulus level in dBm
    #[serde(default = "default_stimulus")]
    pub stimulus_dbm: i32,
}

/// Capture pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Root directory under which session directories are created
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Maximum concurrent blocking sample writers
    #[serde(default = "default_writer_concurrency")]
    pub writer_concurrency: usize,
    /// Minimum duration of one query+parse cycle; faster cycles suspend
    /// for the remainder
    #[serde(with = "humantime_serde", default = "default_min_cycle")]
    pub min_cycle: Duration,
    /// Interval between sweep-finished polls
    #[serde(with = "humantime_serde", default = "default_finished_poll")]
    pub finished_poll: Duration,
}

/// HTTP control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address of the control API
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_vehicle_host() -> String {
    "192.168.2.1".to_string()
}

fn default_control_port() -> u16 {
    40923
}

fn default_event_port() -> u16 {
    40925
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_push_frequency() -> u32 {
    10
}

fn default_instrument_host() -> String {
    "127.0.0.1".to_string()
}

fn default_instrument_port() -> u16 {
    19542
}

fn default_protocol() -> TraceProtocol {
    TraceProtocol::Scpi
}

fn default_trace() -> String {
    "S21".to_string()
}

fn default_start_hz() -> u64 {
    1_000_000_000
}

fn default_stop_hz() -> u64 {
    2_000_000_000
}

fn default_points() -> u32 {
    101
}

fn default_averages() -> u32 {
    1
}

fn default_if_bandwidth() -> u32 {
    10_000
}

fn default_stimulus() -> i32 {
    -10
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_writer_concurrency() -> usize {
    4
}

fn default_min_cycle() -> Duration {
    Duration::from_millis(25)
}

fn default_finished_poll() -> Duration {
    Duration::from_millis(100)
}

fn default_bind() -> SocketAddr {
    ([0, 0, 0, 0], 9005).into()
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self {
            host: default_vehicle_host(),
            control_port: default_control_port(),
            event_port: default_event_port(),
            command_timeout: default_command_timeout(),
            push_frequency_hz: default_push_frequency(),
        }
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            host: default_instrument_host(),
            port: default_instrument_port(),
            raw_port: default_instrument_port(),
            protocol: default_protocol(),
            trace: default_trace(),
            calibration_file: None,
            command_timeout: default_command_timeout(),
            sweep: SweepSettings::default(),
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            start_hz: default_start_hz(),
            stop_hz: default_stop_hz(),
            points: default_points(),
            averages: default_averages(),
            if_bandwidth_hz: default_if_bandwidth(),
            stimulus_dbm: default_stimulus(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            writer_concurrency: default_writer_concurrency(),
            min_cycle: default_min_cycle(),
            finished_poll: default_finished_poll(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            vehicle: VehicleSettings::default(),
            instrument: InstrumentSettings::default(),
            capture: CaptureSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load configuration from `rover.toml` and environment variables.
    ///
    /// Environment variables override file values with the `ROVER_` prefix,
    /// e.g. `ROVER_VEHICLE__HOST=10.0.0.2`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("rover.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ROVER_").split("__"))
            .extract()
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.vehicle.command_timeout.is_zero() {
            return Err("vehicle.command_timeout must be non-zero".to_string());
        }

        if self.instrument.sweep.stop_hz <= self.instrument.sweep.start_hz {
            return Err(format!(
                "Invalid sweep bounds: stop_hz {} must exceed start_hz {}",
                self.instrument.sweep.stop_hz, self.instrument.sweep.start_hz
            ));
        }

        if self.instrument.sweep.points == 0 {
            return Err("instrument.sweep.points must be at least 1".to_string());
        }

        if self.capture.writer_concurrency == 0 {
            return Err("capture.writer_concurrency must be at least 1".to_string());
        }

        Ok(())
    }
}
