//! # Rover GPR Core Library
//!
//! This crate is the control core for a ground-survey rover carrying a sweep
//! instrument (a vector network analyzer feeding a ground-penetrating-radar
//! workflow). It drives the vehicle chassis over its TCP text protocol,
//! executes timed-velocity scan patterns, and captures frequency sweeps from
//! the instrument into per-session CSV archives. Organizing the project as a
//! library keeps the logic shared between the HTTP daemon and the one-shot
//! CLI subcommands in `main.rs`.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered application settings (TOML file plus `ROVER_*`
//!   environment overrides). See [`config::Settings`].
//! - **`error`**: the [`error::RoverError`] taxonomy that separates fatal
//!   transport failures from per-sample recoverable ones.
//! - **`logging`**: tracing subscriber setup shared by the binary and tests.
//! - **`hardware`**: framed TCP channels and the concrete clients built on
//!   them (vehicle chassis, sweep instrument, sprayer boundary), plus
//!   loopback mock servers.
//! - **`motion`**: timed-velocity motion primitives, scan patterns, and the
//!   position tracker with its relative accumulators.
//! - **`scan`**: the scan supervisor owning the single-flight run lifecycle,
//!   cancellation, and guaranteed teardown.
//! - **`capture`**: the sweep capture session: instrument preamble, paced
//!   acquisition loop, and the bounded write pipeline.
//! - **`data`**: trace payload parsing into complex points and CSV sample
//!   storage.
//! - **`server`**: the axum HTTP boundary over the supervisor.

pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod motion;
pub mod scan;
pub mod server;
