//! Scan patterns.
//!
//! Patterns are built from the caller's nominal grid distance `d` with fixed
//! step ratios, tuned on the survey rig and kept stable so recorded sessions
//! stay comparable:
//!
//! - forward legs: `1.05 * d` at 0.2 m/s (the 5% overshoot keeps rows
//!   overlapping after wheel slip);
//! - lateral steps between rows: `0.1 * d` at 0.1 m/s;
//! - line runs: one forward leg of `1.05 * d` at 0.1 m/s;
//! - the perpendicular pass follows a −90 degree yaw at 30 deg/s.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AppResult;
use crate::motion::{travel_time, Move, MotionSequencer};

/// Forward leg length per unit grid distance.
pub const FORWARD_STEP_RATIO: f64 = 1.05;
/// Lateral step length per unit grid distance.
pub const LATERAL_STEP_RATIO: f64 = 0.1;
/// Forward leg speed in m/s.
pub const FORWARD_SPEED: f64 = 0.2;
/// Lateral step speed in m/s.
pub const LATERAL_SPEED: f64 = 0.1;
/// Line run speed in m/s.
pub const LINE_SPEED: f64 = 0.1;
/// Serpentine cycles per square pass.
pub const SQUARE_CYCLES: usize = 6;
/// Yaw between the two square passes, in degrees.
pub const PERPENDICULAR_TURN_DEG: f64 = -90.0;

/// Selectable scan pattern.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Serpentine square pass, then the same pass rotated 90 degrees.
    #[default]
    Square,
    /// A single forward run.
    Line,
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Square => f.write_str("square"),
            Pattern::Line => f.write_str("line"),
        }
    }
}

/// The move of a line run for grid distance `d`.
pub fn line_move(distance: f64) -> Move {
    Move::x(FORWARD_STEP_RATIO * distance).with_speed(LINE_SPEED)
}

/// Check that every leg the pattern will command for grid distance `d`
/// has a representable travel time, so a scan is rejected before any
/// vehicle traffic rather than failing mid-run.
pub fn validate_legs(pattern: Pattern, distance: f64) -> AppResult<()> {
    match pattern {
        Pattern::Square => {
            travel_time(FORWARD_STEP_RATIO * distance, FORWARD_SPEED)?;
            travel_time(LATERAL_STEP_RATIO * distance, LATERAL_SPEED)?;
        }
        Pattern::Line => {
            travel_time(FORWARD_STEP_RATIO * distance, LINE_SPEED)?;
        }
    }
    Ok(())
}

/// One serpentine pass: six cycles of attitude/position queries followed by
/// forward, lateral, back, lateral legs.
pub async fn square_pass(
    seq: &MotionSequencer,
    distance: f64,
    token: &CancellationToken,
) -> AppResult<()> {
    for cycle in 0..SQUARE_CYCLES {
        debug!(cycle, distance, "square cycle");
        seq.log_attitude().await?;
        seq.refresh_position().await?;

        seq.move_relative(
            &Move::x(FORWARD_STEP_RATIO * distance).with_speed(FORWARD_SPEED),
            token,
        )
        .await?;
        seq.move_relative(
            &Move::y(LATERAL_STEP_RATIO * distance).with_speed(LATERAL_SPEED),
            token,
        )
        .await?;
        seq.move_relative(
            &Move::x(-FORWARD_STEP_RATIO * distance).with_speed(FORWARD_SPEED),
            token,
        )
        .await?;
        seq.move_relative(
            &Move::y(LATERAL_STEP_RATIO * distance).with_speed(LATERAL_SPEED),
            token,
        )
        .await?;
    }
    Ok(())
}

/// Full square pattern: one pass, a 90 degree turn, and the perpendicular
/// pass over the same ground.
pub async fn run_square(
    seq: &MotionSequencer,
    distance: f64,
    token: &CancellationToken,
) -> AppResult<()> {
    square_pass(seq, distance, token).await?;
    seq.move_relative(&Move::turn(PERPENDICULAR_TURN_DEG), token)
        .await?;
    square_pass(seq, distance, token).await
}
