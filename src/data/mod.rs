//! Trace parsing and sample storage.
pub mod storage;
pub mod trace;

pub use trace::{Sample, TracePoint};
