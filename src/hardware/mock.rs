//! Mock vehicle and instrument servers.
//!
//! Loopback TCP servers speaking the real wire protocols, used by the
//! `--simulate` flag and by the test suite. Both record every command they
//! receive so tests can assert ordering and absence (for example, that no
//! trace query happens after a capture deadline).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{CaptureSettings, InstrumentSettings, VehicleSettings};
use crate::error::AppResult;

/// Interval between pushed sweeps on the mock raw stream.
const RAW_PUSH_INTERVAL: Duration = Duration::from_millis(25);

struct VehicleState {
    commands: Mutex<Vec<String>>,
    position_reply: Mutex<String>,
    event_clients: Mutex<Vec<OwnedWriteHalf>>,
}

/// Loopback chassis: `;`-framed commands, canned replies, push events on a
/// second port.
pub struct MockVehicle {
    control_addr: SocketAddr,
    event_addr: SocketAddr,
    state: Arc<VehicleState>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockVehicle {
    /// Bind both listeners on ephemeral loopback ports and start serving.
    pub async fn spawn() -> AppResult<Self> {
        let control = TcpListener::bind("127.0.0.1:0").await?;
        let events = TcpListener::bind("127.0.0.1:0").await?;
        let control_addr = control.local_addr()?;
        let event_addr = events.local_addr()?;

        let state = Arc::new(VehicleState {
            commands: Mutex::new(Vec::new()),
            position_reply: Mutex::new("0.0 0.0 0.0".to_string()),
            event_clients: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let control_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = control.accept().await {
                debug!(%peer, "mock vehicle control client");
                tokio::spawn(serve_control(stream, accept_state.clone()));
            }
        });

        let event_state = state.clone();
        let event_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = events.accept().await {
                debug!(%peer, "mock vehicle event client");
                let (_, write) = stream.into_split();
                event_state.event_clients.lock().await.push(write);
            }
        });

        Ok(Self {
            control_addr,
            event_addr,
            state,
            tasks: vec![control_task, event_task],
        })
    }

    /// Vehicle settings pointing at this mock, with a short timeout to keep
    /// tests brisk.
    pub fn vehicle_settings(&self) -> VehicleSettings {
        VehicleSettings {
            host: self.control_addr.ip().to_string(),
            control_port: self.control_addr.port(),
            event_port: self.event_addr.port(),
            command_timeout: Duration::from_secs(1),
            push_frequency_hz: 10,
        }
    }

    /// Every command received so far, in arrival order.
    pub async fn commands(&self) -> Vec<String> {
        self.state.commands.lock().await.clone()
    }

    pub async fn clear_commands(&self) {
        self.state.commands.lock().await.clear();
    }

    /// Override the `chassis position ?` reply (e.g. with garbage).
    pub async fn set_position_reply(&self, reply: &str) {
        *self.state.position_reply.lock().await = reply.to_string();
    }

    /// Push one frame to every connected event client.
    pub async fn push_event(&self, frame: &str) {
        let mut clients = self.state.event_clients.lock().await;
        for client in clients.iter_mut() {
            let _ = client.write_all(frame.as_bytes()).await;
        }
    }
}

impl Drop for MockVehicle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve_control(stream: TcpStream, state: Arc<VehicleState>) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b';', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = String::from_utf8_lossy(&buf)
            .trim_end_matches(';')
            .trim()
            .to_string();
        state.commands.lock().await.push(command.clone());

        let reply = if command == "chassis position ?" {
            state.position_reply.lock().await.clone()
        } else if command == "chassis attitude ?" {
            "0.0 0.0 0.0".to_string()
        } else {
            "ok".to_string()
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

struct VnaState {
    commands: Mutex<Vec<(Instant, String)>>,
    device_reply: Mutex<String>,
    fin_false_replies: Mutex<u32>,
    canned_traces: Mutex<VecDeque<String>>,
    points: usize,
}

/// Loopback instrument server: newline-framed SCPI plus a raw stream port
/// pushing one generated sweep per interval.
pub struct MockVna {
    scpi_addr: SocketAddr,
    raw_addr: SocketAddr,
    state: Arc<VnaState>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockVna {
    pub async fn spawn() -> AppResult<Self> {
        let scpi = TcpListener::bind("127.0.0.1:0").await?;
        let raw = TcpListener::bind("127.0.0.1:0").await?;
        let scpi_addr = scpi.local_addr()?;
        let raw_addr = raw.local_addr()?;

        let state = Arc::new(VnaState {
            commands: Mutex::new(Vec::new()),
            device_reply: Mutex::new("MockVNA serial 0001".to_string()),
            fin_false_replies: Mutex::new(2),
            canned_traces: Mutex::new(VecDeque::new()),
            points: 101,
        });

        let accept_state = state.clone();
        let scpi_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = scpi.accept().await {
                debug!(%peer, "mock instrument client");
                tokio::spawn(serve_scpi(stream, accept_state.clone()));
            }
        });

        let raw_state = state.clone();
        let raw_task = tokio::spawn(async move {
            while let Ok((stream, peer)) = raw.accept().await {
                debug!(%peer, "mock raw stream client");
                tokio::spawn(serve_raw(stream, raw_state.clone()));
            }
        });

        Ok(Self {
            scpi_addr,
            raw_addr,
            state,
            tasks: vec![scpi_task, raw_task],
        })
    }

    /// Instrument settings pointing at this mock.
    pub fn instrument_settings(&self) -> InstrumentSettings {
        InstrumentSettings {
            host: self.scpi_addr.ip().to_string(),
            port: self.scpi_addr.port(),
            raw_port: self.raw_addr.port(),
            command_timeout: Duration::from_secs(1),
            ..InstrumentSettings::default()
        }
    }

    /// Capture settings with a fast cadence for tests.
    pub fn capture_settings(data_dir: std::path::PathBuf) -> CaptureSettings {
        CaptureSettings {
            data_dir,
            writer_concurrency: 2,
            min_cycle: Duration::from_millis(10),
            finished_poll: Duration::from_millis(20),
        }
    }

    /// Every command received so far with its arrival instant.
    pub async fn timed_commands(&self) -> Vec<(Instant, String)> {
        self.state.commands.lock().await.clone()
    }

    pub async fn commands(&self) -> Vec<String> {
        self.state
            .commands
            .lock()
            .await
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Arrival instants of trace queries only.
    pub async fn trace_query_times(&self) -> Vec<Instant> {
        self.state
            .commands
            .lock()
            .await
            .iter()
            .filter(|(_, command)| command.starts_with(":VNA:TRACE:DATA?"))
            .map(|(at, _)| *at)
            .collect()
    }

    /// Reply to `:DEV:CONN?` with this (e.g. "Not connected").
    pub async fn set_device_reply(&self, reply: &str) {
        *self.state.device_reply.lock().await = reply.to_string();
    }

    /// How many times `:VNA:ACQ:FIN?` answers FALSE before TRUE.
    pub async fn set_fin_false_replies(&self, count: u32) {
        *self.state.fin_false_replies.lock().await = count;
    }

    /// Serve this payload for one upcoming trace query instead of a
    /// generated sweep.
    pub async fn queue_trace_payload(&self, payload: &str) {
        self.state
            .canned_traces
            .lock()
            .await
            .push_back(payload.to_string());
    }
}

impl Drop for MockVna {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve_scpi(stream: TcpStream, state: Arc<VnaState>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        state
            .commands
            .lock()
            .await
            .push((Instant::now(), command.clone()));

        let reply = if command == "*IDN?" {
            "MockVNA-GUI".to_string()
        } else if command == ":DEV:CONN?" {
            state.device_reply.lock().await.clone()
        } else if command == ":VNA:ACQ:FIN?" {
            let mut remaining = state.fin_false_replies.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                "FALSE".to_string()
            } else {
                "TRUE".to_string()
            }
        } else if command.starts_with(":VNA:TRACE:DATA?") {
            match state.canned_traces.lock().await.pop_front() {
                Some(canned) => canned,
                None => generated_trace(state.points, true),
            }
        } else {
            // Set commands acknowledge with an empty line
            String::new()
        };

        if write
            .write_all(format!("{}\n", reply).as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn serve_raw(stream: TcpStream, state: Arc<VnaState>) {
    let (_, mut write) = stream.into_split();
    loop {
        let sweep = generated_trace(state.points, false);
        if write
            .write_all(format!("{}\n", sweep).as_bytes())
            .await
            .is_err()
        {
            break;
        }
        tokio::time::sleep(RAW_PUSH_INTERVAL).await;
    }
}

/// One plausible sweep: linear frequency axis, noisy complex values.
fn generated_trace(points: usize, bracketed: bool) -> String {
    let mut rng = rand::thread_rng();
    let step = 1_000_000_000.0 / (points.max(2) - 1) as f64;
    let triples: Vec<String> = (0..points)
        .map(|i| {
            let freq = 1_000_000_000.0 + step * i as f64;
            let re: f64 = rng.gen_range(-0.5..0.5);
            let im: f64 = rng.gen_range(-0.5..0.5);
            format!("{},{},{}", freq, re, im)
        })
        .collect();
    if bracketed {
        format!("[{}]", triples.join(","))
    } else {
        triples.join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::trace::{parse_raw_records, parse_trace_data};

    #[test]
    fn generated_trace_parses_in_both_forms() {
        let bracketed = generated_trace(11, true);
        assert_eq!(parse_trace_data(&bracketed).unwrap().len(), 11);

        let raw = generated_trace(11, false);
        assert_eq!(parse_raw_records(&raw).unwrap().len(), 11);
    }

    #[tokio::test]
    async fn control_commands_are_recorded_and_answered() {
        let mock = MockVehicle::spawn().await.unwrap();
        let settings = mock.vehicle_settings();

        let stream = TcpStream::connect(settings.control_addr()).await.unwrap();
        let (mut read, mut write) = stream.into_split();
        write.write_all(b"command;").await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::io::AsyncReadExt::read(&mut read, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"ok");
        assert_eq!(mock.commands().await, vec!["command".to_string()]);
    }

    #[tokio::test]
    async fn fin_poll_sequence_goes_false_then_true() {
        let mock = MockVna::spawn().await.unwrap();
        mock.set_fin_false_replies(1).await;
        let settings = mock.instrument_settings();

        let stream = TcpStream::connect(settings.scpi_addr()).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b":VNA:ACQ:FIN?\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "FALSE");
        write.write_all(b":VNA:ACQ:FIN?\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "TRUE");
    }
}
