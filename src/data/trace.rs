//! Sweep trace payload parsing.
//!
//! The instrument returns one sweep as a flat list of (frequency, real,
//! imaginary) triples. Two wire forms exist:
//!
//! - SCPI query reply: the whole sweep in one bracketed, comma-separated
//!   payload, e.g. `[1000000,1.0,2.0,2000000,0.5,-0.5]`;
//! - raw stream: one line of semicolon-delimited `freq,real,imag` records.
//!
//! A payload whose value count is not a multiple of three is malformed and
//! rejects the whole sample; the capture loop logs it and moves on.

use chrono::{DateTime, Utc};
use num_complex::Complex64;

use crate::error::{AppResult, RoverError};

/// One frequency point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub frequency_hz: f64,
    pub value: Complex64,
}

/// One timestamped sweep.
#[derive(Debug, Clone)]
pub struct Sample {
    pub captured_at: DateTime<Utc>,
    pub points: Vec<TracePoint>,
}

impl Sample {
    /// Wrap freshly parsed points with the current capture time.
    pub fn now(points: Vec<TracePoint>) -> Self {
        Self {
            captured_at: Utc::now(),
            points,
        }
    }
}

/// Parse a bracketed SCPI trace reply.
pub fn parse_trace_data(payload: &str) -> AppResult<Vec<TracePoint>> {
    // Point order is implicit; the brackets carry no structure
    let stripped = payload.replace(['[', ']'], "");
    let values: Vec<&str> = stripped.split(',').map(str::trim).collect();

    if values.len() % 3 != 0 {
        return Err(RoverError::protocol(format!(
            "trace payload has {} values, expected a multiple of 3",
            values.len()
        )));
    }

    values
        .chunks_exact(3)
        .map(|triple| {
            Ok(TracePoint {
                frequency_hz: parse_value(triple[0])?,
                value: Complex64::new(parse_value(triple[1])?, parse_value(triple[2])?),
            })
        })
        .collect()
}

/// Parse one line of semicolon-delimited raw records.
pub fn parse_raw_records(line: &str) -> AppResult<Vec<TracePoint>> {
    line.split(';')
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .map(|record| {
            let fields: Vec<&str> = record.split(',').map(str::trim).collect();
            if fields.len() != 3 {
                return Err(RoverError::protocol(format!(
                    "raw record has {} fields, expected freq,real,imag: {:?}",
                    fields.len(),
                    record
                )));
            }
            Ok(TracePoint {
                frequency_hz: parse_value(fields[0])?,
                value: Complex64::new(parse_value(fields[1])?, parse_value(fields[2])?),
            })
        })
        .collect()
}

fn parse_value(field: &str) -> AppResult<f64> {
    field
        .parse::<f64>()
        .map_err(|_| RoverError::protocol(format!("invalid trace value {:?}", field)))
}
