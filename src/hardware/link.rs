//! Framed request/response channels over TCP.
//!
//! Both peers in this system speak plain-text protocols over stream sockets,
//! but frame them differently: the vehicle terminates commands with `;` and
//! replies with unframed chunks, while the instrument server is strictly
//! line-oriented. `CommandChannel` captures the shared discipline once:
//!
//! - one in-flight request per channel (interior lock over the socket
//!   halves), so requests and responses stay correlated;
//! - a bounded response timeout that returns a *sentinel* (`Ok(None)`)
//!   rather than an error, leaving the channel usable for the next command;
//!   a partial line received before the timeout stays buffered and is
//!   completed, whole, by a later read;
//! - I/O failures (including EOF) are fatal for the enclosing operation.
//!
//! `EventStream` is the second vehicle connection: pushed frames are read in
//! the background and logged/forwarded with no delivery guarantees.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{AppResult, RoverError};

/// Largest unframed response chunk we accept from the vehicle.
const MAX_CHUNK: usize = 1024;

/// How a response frame is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Responses are newline-terminated lines.
    Line,
    /// Responses arrive as a single unframed chunk; decode and trim it.
    Chunk,
}

/// Write terminator plus response framing for one protocol.
#[derive(Debug, Clone, Copy)]
pub struct Framing {
    /// Appended to every outgoing command.
    pub terminator: &'static str,
    /// How the matching response is read.
    pub read_mode: ReadMode,
}

impl Framing {
    /// Vehicle framing: `;`-terminated commands, chunked responses.
    pub const SEMICOLON: Framing = Framing {
        terminator: ";",
        read_mode: ReadMode::Chunk,
    };

    /// Instrument framing: newline-terminated commands and responses.
    pub const NEWLINE: Framing = Framing {
        terminator: "\n",
        read_mode: ReadMode::Line,
    };
}

struct ChannelIo {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Partial line kept across timed-out reads so frames never tear.
    pending: Vec<u8>,
}

/// One framed request/response connection.
///
/// Cheap to share behind an `Arc`; the interior lock serializes requests so
/// concurrent callers cannot interleave frames.
pub struct CommandChannel {
    label: &'static str,
    addr: String,
    framing: Framing,
    timeout: Duration,
    io: Mutex<ChannelIo>,
}

impl CommandChannel {
    /// Open a channel. Connection failure is fatal: the enclosing operation
    /// aborts rather than retrying here.
    pub async fn connect(
        label: &'static str,
        addr: &str,
        framing: Framing,
        command_timeout: Duration,
    ) -> AppResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RoverError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        info!(channel = label, %addr, "connected");
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            label,
            addr: addr.to_string(),
            framing,
            timeout: command_timeout,
            io: Mutex::new(ChannelIo {
                reader: BufReader::new(read_half),
                writer: write_half,
                pending: Vec::new(),
            }),
        })
    }

    /// Remote address this channel talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one command and await its response frame.
    ///
    /// Returns `Ok(None)` when the peer does not answer within the timeout;
    /// the channel remains usable afterwards, and a line-framed reply that
    /// straddles the timeout is handed whole to the next request instead of
    /// being torn. Write failures and EOF are `Err`.
    pub async fn send(&self, command: &str) -> AppResult<Option<String>> {
        let mut io = self.io.lock().await;

        io.writer
            .write_all(format!("{}{}", command, self.framing.terminator).as_bytes())
            .await?;
        io.writer.flush().await?;

        let response = match self.read_frame(&mut io).await? {
            Some(frame) => frame,
            None => {
                warn!(channel = self.label, %command, "no response within timeout");
                return Ok(None);
            }
        };

        debug!(channel = self.label, %command, %response, "command ok");
        Ok(Some(response))
    }

    /// Await one unsolicited frame (used by the raw trace stream, which
    /// pushes records without being queried). Timeout is the same sentinel
    /// as for `send`.
    pub async fn recv(&self) -> AppResult<Option<String>> {
        let mut io = self.io.lock().await;
        self.read_frame(&mut io).await
    }

    async fn read_frame(&self, io: &mut ChannelIo) -> AppResult<Option<String>> {
        match self.framing.read_mode {
            ReadMode::Line => {
                // read_until appends into the persistent buffer, so a
                // timed-out read leaves any partial line in place and the
                // next call resumes it into one complete frame.
                match timeout(
                    self.timeout,
                    io.reader.read_until(b'\n', &mut io.pending),
                )
                .await
                {
                    Err(_) => Ok(None),
                    Ok(read) => {
                        if read? == 0 {
                            return Err(self.closed());
                        }
                        let frame = String::from_utf8_lossy(&io.pending).trim().to_string();
                        io.pending.clear();
                        Ok(Some(frame))
                    }
                }
            }
            ReadMode::Chunk => {
                let mut buf = vec![0u8; MAX_CHUNK];
                match timeout(self.timeout, io.reader.read(&mut buf)).await {
                    Err(_) => Ok(None),
                    Ok(read) => {
                        let n = read?;
                        if n == 0 {
                            return Err(self.closed());
                        }
                        Ok(Some(String::from_utf8_lossy(&buf[..n]).trim().to_string()))
                    }
                }
            }
        }
    }

    fn closed(&self) -> RoverError {
        RoverError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{} connection closed by {}", self.label, self.addr),
        ))
    }
}

/// Background reader for the vehicle's push event connection.
///
/// Frames are logged at debug level and forwarded on a broadcast channel;
/// subscribers that lag simply miss frames (no delivery guarantees).
pub struct EventStream {
    stream: TcpStream,
    addr: String,
}

impl EventStream {
    /// Connect the event socket. Same fatal-at-construction rule as
    /// [`CommandChannel::connect`].
    pub async fn connect(addr: &str) -> AppResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| RoverError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        info!(channel = "events", %addr, "connected");
        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }

    /// Consume the stream, logging and forwarding frames until the peer
    /// closes or the task is aborted.
    pub async fn forward(mut self, tx: broadcast::Sender<String>) {
        let mut buf = BytesMut::with_capacity(MAX_CHUNK);
        loop {
            buf.clear();
            match self.stream.read_buf(&mut buf).await {
                Ok(0) => {
                    info!(addr = %self.addr, "event stream closed by peer");
                    break;
                }
                Ok(_) => {
                    let frame = String::from_utf8_lossy(&buf).trim().to_string();
                    if !frame.is_empty() {
                        debug!(event = %frame, "vehicle event");
                        // Nobody listening is fine; events are best-effort
                        let _ = tx.send(frame);
                    }
                }
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "event stream read failed");
                    break;
                }
            }
        }
    }
}
