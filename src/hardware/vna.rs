//! Sweep instrument client.
//!
//! Talks to the instrument server's SCPI-style TCP interface (newline
//! framed). The capture preamble verifies a device is attached, switches to
//! VNA mode, applies the sweep shape, then polls `:VNA:ACQ:FIN?` until the
//! first sweep completes. Trace data is retrieved either by querying
//! `:VNA:TRACE:DATA?` on the SCPI channel or, when the raw variant is
//! configured, by reading pushed records from a second connection. Both
//! variants live behind the one client; the choice is configuration.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{InstrumentSettings, TraceProtocol};
use crate::data::trace::{parse_raw_records, parse_trace_data, TracePoint};
use crate::error::{AppResult, RoverError};
use crate::hardware::link::{CommandChannel, Framing};

/// Connected sweep instrument.
pub struct VnaClient {
    scpi: CommandChannel,
    raw: Option<CommandChannel>,
    trace: String,
    protocol: TraceProtocol,
}

impl VnaClient {
    /// Connect the SCPI channel, plus the raw stream channel when the raw
    /// variant is configured.
    pub async fn connect(settings: &InstrumentSettings) -> AppResult<Self> {
        let scpi = CommandChannel::connect(
            "instrument",
            &settings.scpi_addr(),
            Framing::NEWLINE,
            settings.command_timeout,
        )
        .await?;

        let raw = match settings.protocol {
            TraceProtocol::Scpi => None,
            TraceProtocol::Raw => Some(
                CommandChannel::connect(
                    "instrument-raw",
                    &settings.raw_addr(),
                    Framing::NEWLINE,
                    settings.command_timeout,
                )
                .await?,
            ),
        };

        Ok(Self {
            scpi,
            raw,
            trace: settings.trace.clone(),
            protocol: settings.protocol,
        })
    }

    /// Query the server identity (logged, content not validated).
    pub async fn identify(&self) -> AppResult<Option<String>> {
        let idn = self.scpi.send("*IDN?").await?;
        if let Some(idn) = &idn {
            info!(%idn, "instrument server");
        }
        Ok(idn)
    }

    /// Ask the server to connect a device and verify one is attached.
    ///
    /// A "Not connected" reply is fatal for the capture; so is a silent
    /// check, since an unverifiable instrument is not worth sweeping with.
    pub async fn ensure_device_connected(&self) -> AppResult<String> {
        self.scpi.send(":DEV:CONN").await?;
        match self.scpi.send(":DEV:CONN?").await? {
            Some(device) if device == "Not connected" => Err(RoverError::InstrumentUnavailable),
            Some(device) => {
                info!(%device, "instrument device connected");
                Ok(device)
            }
            None => {
                warn!("device connectivity check got no reply");
                Err(RoverError::InstrumentUnavailable)
            }
        }
    }

    /// Apply mode, calibration and sweep shape.
    pub async fn configure(&self, settings: &InstrumentSettings) -> AppResult<()> {
        for command in setup_commands(settings) {
            self.scpi.send(&command).await?;
        }
        info!(
            start_hz = settings.sweep.start_hz,
            stop_hz = settings.sweep.stop_hz,
            points = settings.sweep.points,
            "sweep configured"
        );
        Ok(())
    }

    /// Poll `:VNA:ACQ:FIN?` until the sweep reports finished.
    ///
    /// An unanswered poll keeps polling; cancellation exits with
    /// [`RoverError::Cancelled`].
    pub async fn wait_sweep_finished(
        &self,
        poll_interval: Duration,
        token: &CancellationToken,
    ) -> AppResult<()> {
        loop {
            match self.scpi.send(":VNA:ACQ:FIN?").await? {
                Some(state) if state == "FALSE" => {}
                Some(_) => return Ok(()),
                None => {}
            }
            tokio::select! {
                _ = sleep(poll_interval) => {}
                _ = token.cancelled() => return Err(RoverError::Cancelled),
            }
        }
    }

    /// Retrieve one trace payload. `Ok(None)` when the instrument did not
    /// answer in time.
    pub async fn read_trace(&self) -> AppResult<Option<String>> {
        match self.protocol {
            TraceProtocol::Scpi => {
                self.scpi
                    .send(&format!(":VNA:TRACE:DATA? {}", self.trace))
                    .await
            }
            TraceProtocol::Raw => match &self.raw {
                Some(channel) => channel.recv().await,
                None => Err(RoverError::Configuration(
                    "raw protocol selected but no raw channel connected".to_string(),
                )),
            },
        }
    }

    /// Parse a payload according to the configured variant.
    pub fn parse_trace(&self, payload: &str) -> AppResult<Vec<TracePoint>> {
        let points = match self.protocol {
            TraceProtocol::Scpi => parse_trace_data(payload)?,
            TraceProtocol::Raw => parse_raw_records(payload)?,
        };
        debug!(points = points.len(), "trace parsed");
        Ok(points)
    }
}

/// The ordered SCPI commands applied by [`VnaClient::configure`].
fn setup_commands(settings: &InstrumentSettings) -> Vec<String> {
    let sweep = &settings.sweep;
    let mut commands = vec![
        ":DEV:MODE VNA".to_string(),
        ":VNA:SWEEP FREQUENCY".to_string(),
        format!(":VNA:STIM:LVL {}", sweep.stimulus_dbm),
        format!(":VNA:ACQ:IFBW {}", sweep.if_bandwidth_hz),
        format!(":VNA:ACQ:AVG {}", sweep.averages),
        format!(":VNA:ACQ:POINTS {}", sweep.points),
        format!(":VNA:FREQ:START {}", sweep.start_hz),
        format!(":VNA:FREQ:STOP {}", sweep.stop_hz),
    ];
    if let Some(cal) = &settings.calibration_file {
        commands.push(format!(":VNA:CAL:LOAD {}", cal.display()));
    }
    commands
}
