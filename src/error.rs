//! Custom error types for the application.
//!
//! This module defines the primary error type, `RoverError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify failures, because the two halves of the system
//! treat failure very differently: a broken vehicle socket must abort a scan,
//! while one garbled trace payload must not abort a capture.
//!
//! ## Error classes
//!
//! - **`Connect`**: the transport could not be established. Always fatal at
//!   channel construction; the enclosing operation aborts.
//! - **`Io`** / **`Join`**: transport or task failures after construction.
//!   Fatal for the operation that hit them.
//! - **`Protocol`**: a peer replied with something unparseable (wrong arity
//!   position report, trace payload whose length is not a multiple of three).
//!   Callers recover locally: skip the sample, keep the last known value.
//! - **`SessionExists`**: a capture precondition failure, raised before any
//!   instrument command or other side effect.
//! - **`Cancelled`**: cooperative cancellation unwinding. Not a fault; the
//!   supervisor logs it at info level and teardown still runs.
//! - **`InstrumentUnavailable`** / **`Storage`** / **`Config`** /
//!   **`InvalidParameter`**: the remaining ambient failures, named so the
//!   HTTP boundary can map them to sensible status codes.
//!
//! Command timeouts are deliberately *not* represented here: the channel
//! layer surfaces them as an `Ok(None)` sentinel so that a slow peer never
//! poisons the channel (see `hardware::link`).

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, RoverError>;

#[derive(Error, Debug)]
pub enum RoverError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session directory already exists: {0}")]
    SessionExists(PathBuf),

    #[error("scan cancelled")]
    Cancelled,

    #[error("instrument reports no device connected")]
    InstrumentUnavailable,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("configuration validation error: {0}")]
    Configuration(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RoverError {
    /// Shorthand for protocol-level parse failures.
    pub fn protocol(msg: impl Into<String>) -> Self {
        RoverError::Protocol(msg.into())
    }

    /// True for failures a loop may absorb and continue past (a skipped
    /// sample or a cancelled run), false for those that must abort the
    /// enclosing operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RoverError::Protocol(_) | RoverError::Cancelled)
    }
}
