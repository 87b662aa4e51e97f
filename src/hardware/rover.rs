//! Vehicle protocol client.
//!
//! The chassis speaks a plain-text protocol on two TCP ports: a control port
//! (commands terminated with `;`, chunked replies) and a push event port.
//! Command surface used here:
//!
//! | Command                  | Effect                                  |
//! |--------------------------|-----------------------------------------|
//! | `command`                | enter remote-command mode               |
//! | `chassis push freq <hz>` | request chassis telemetry pushes        |
//! | `chassis speed <axis> <v>` | set axis velocity (x/y m/s, z deg/s)  |
//! | `chassis position ?`     | report `x y z` (three floats)           |
//! | `chassis attitude ?`     | report attitude (logged only)           |
//! | `quit`                   | leave remote-command mode               |
//!
//! The vehicle does not acknowledge-check: replies are informational and a
//! timed-out reply is skipped, not retried. Push events are consumed by a
//! background task and forwarded on a broadcast channel.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::VehicleSettings;
use crate::error::{AppResult, RoverError};
use crate::hardware::link::{CommandChannel, EventStream, Framing};
use crate::motion::position::{Axis, Pose};

/// Buffered event frames before slow subscribers start missing some.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connected vehicle: control channel plus background event reader.
pub struct RoverClient {
    ctrl: CommandChannel,
    events: broadcast::Sender<String>,
    event_task: JoinHandle<()>,
}

impl RoverClient {
    /// Connect both vehicle sockets and start the event reader.
    ///
    /// Either connection failing is fatal; a half-connected client is never
    /// returned.
    pub async fn connect(vehicle: &VehicleSettings) -> AppResult<Self> {
        let ctrl = CommandChannel::connect(
            "chassis",
            &vehicle.control_addr(),
            Framing::SEMICOLON,
            vehicle.command_timeout,
        )
        .await?;
        let events = EventStream::connect(&vehicle.event_addr()).await?;

        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let event_task = tokio::spawn(events.forward(tx.clone()));

        info!(addr = %ctrl.addr(), "vehicle connected");
        Ok(Self {
            ctrl,
            events: tx,
            event_task,
        })
    }

    /// Subscribe to forwarded push events (best effort, may miss frames).
    pub fn subscribe_events(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// Enter remote-command mode. Must precede any chassis command.
    pub async fn enter_command_mode(&self) -> AppResult<()> {
        self.ctrl.send("command").await.map(|_| ())
    }

    /// Ask the chassis to push telemetry at the given frequency.
    pub async fn set_push_frequency(&self, hz: u32) -> AppResult<()> {
        self.ctrl
            .send(&format!("chassis push freq {}", hz))
            .await
            .map(|_| ())
    }

    /// Command a velocity on one axis (m/s for x/y, deg/s for z).
    pub async fn set_velocity(&self, axis: Axis, velocity: f64) -> AppResult<()> {
        self.ctrl
            .send(&format!("chassis speed {} {}", axis, velocity))
            .await
            .map(|_| ())
    }

    /// Command zero velocity on one axis.
    pub async fn stop(&self, axis: Axis) -> AppResult<()> {
        self.set_velocity(axis, 0.0).await
    }

    /// Query the reported pose. `Ok(None)` when the reply timed out;
    /// `Err(Protocol)` when the reply does not parse.
    pub async fn query_position(&self) -> AppResult<Option<Pose>> {
        match self.ctrl.send("chassis position ?").await? {
            Some(reply) => parse_pose(&reply).map(Some),
            None => Ok(None),
        }
    }

    /// Query the reported attitude; the raw reply is only logged.
    pub async fn query_attitude(&self) -> AppResult<Option<String>> {
        let reply = self.ctrl.send("chassis attitude ?").await?;
        if let Some(attitude) = &reply {
            debug!(%attitude, "chassis attitude");
        }
        Ok(reply)
    }

    /// Leave remote-command mode. The chassis halts on its own once the
    /// command session ends.
    pub async fn quit(&self) -> AppResult<()> {
        self.ctrl.send("quit").await.map(|_| ())
    }
}

impl Drop for RoverClient {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

/// Parse a `chassis position ?` reply: exactly three floats.
pub fn parse_pose(reply: &str) -> AppResult<Pose> {
    let fields: Vec<&str> = reply.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(RoverError::protocol(format!(
            "position reply has {} fields, expected 3: {:?}",
            fields.len(),
            reply
        )));
    }
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| RoverError::protocol(format!("invalid position value {:?}", s)))
    };
    Ok(Pose {
        x: parse(fields[0])?,
        y: parse(fields[1])?,
        z: parse(fields[2])?,
    })
}
