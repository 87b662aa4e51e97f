//! Timed-velocity motion primitives.
//!
//! The vehicle has no native "move this far" command, only axis velocities.
//! A relative move therefore commands a velocity whose sign matches the
//! requested displacement, suspends for `|distance| / speed`, then commands
//! zero. The stop command is sent on *every* exit path, including
//! cancellation and errors, so a scan can never leave the chassis driving.
//!
//! Completed moves add exactly the commanded displacement to the shared
//! [`position::PositionTracker`]; nothing here closes the loop against
//! reported positions.

pub mod pattern;
pub mod position;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AppResult, RoverError};
use crate::hardware::rover::RoverClient;
use position::{Axis, PositionTracker};

/// Default linear speed in m/s.
pub const DEFAULT_SPEED: f64 = 0.2;
/// Default rotation speed in deg/s.
pub const DEFAULT_TURN_SPEED: f64 = 30.0;

/// One relative move request: x/y displacement in meters, z in degrees.
/// At most one of x and y may be non-zero; z is independent and applied
/// after the linear leg.
#[derive(Debug, Clone, Copy)]
pub struct Move {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub speed: f64,
    pub turn_speed: f64,
}

impl Default for Move {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            speed: DEFAULT_SPEED,
            turn_speed: DEFAULT_TURN_SPEED,
        }
    }
}

impl Move {
    /// Forward/backward displacement in meters.
    pub fn x(displacement: f64) -> Self {
        Self {
            x: displacement,
            ..Default::default()
        }
    }

    /// Lateral displacement in meters.
    pub fn y(displacement: f64) -> Self {
        Self {
            y: displacement,
            ..Default::default()
        }
    }

    /// Yaw rotation in degrees.
    pub fn turn(degrees: f64) -> Self {
        Self {
            z: degrees,
            ..Default::default()
        }
    }

    /// Override the linear speed (m/s).
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Override the rotation speed (deg/s).
    pub fn with_turn_speed(mut self, turn_speed: f64) -> Self {
        self.turn_speed = turn_speed;
        self
    }
}

/// How long a displacement takes at the given speed.
///
/// `Err` when the quotient does not fit a `Duration` (absurd
/// displacements, zero speed): the leg is rejected instead of timed.
pub fn travel_time(displacement: f64, speed: f64) -> AppResult<Duration> {
    Duration::try_from_secs_f64((displacement / speed).abs()).map_err(|_| {
        RoverError::InvalidParameter(format!(
            "travel time for displacement {} at speed {} is not representable",
            displacement, speed
        ))
    })
}

/// Velocity whose magnitude is `speed` and whose sign matches the
/// displacement.
fn signed_velocity(displacement: f64, speed: f64) -> f64 {
    speed.abs().copysign(displacement)
}

/// Executes moves against a connected vehicle and accounts for them in the
/// shared tracker.
pub struct MotionSequencer {
    rover: Arc<RoverClient>,
    tracker: Arc<RwLock<PositionTracker>>,
}

impl MotionSequencer {
    pub fn new(rover: Arc<RoverClient>, tracker: Arc<RwLock<PositionTracker>>) -> Self {
        Self { rover, tracker }
    }

    /// Execute one relative move.
    ///
    /// If both x and y are set the call proceeds using x and warns; the
    /// chassis cannot combine the axes in one timed leg. The z rotation, if
    /// any, runs after the linear leg.
    pub async fn move_relative(&self, mv: &Move, token: &CancellationToken) -> AppResult<()> {
        if mv.x != 0.0 && mv.y != 0.0 {
            warn!(
                x = mv.x,
                y = mv.y,
                "move requested on both linear axes; proceeding with x only"
            );
        }

        if mv.x != 0.0 {
            self.timed_axis_move(Axis::X, mv.x, mv.speed, token).await?;
        } else if mv.y != 0.0 {
            self.timed_axis_move(Axis::Y, mv.y, mv.speed, token).await?;
        }

        if mv.z != 0.0 {
            self.timed_axis_move(Axis::Z, mv.z, mv.turn_speed, token)
                .await?;
        }

        Ok(())
    }

    /// Refresh the tracker's absolute pose from a position query.
    ///
    /// A timed-out or unparseable reply keeps the last known pose and the
    /// scan continues; only transport failures propagate.
    pub async fn refresh_position(&self) -> AppResult<()> {
        match self.rover.query_position().await {
            Ok(Some(pose)) => {
                debug!(x = pose.x, y = pose.y, z = pose.z, "position report");
                self.tracker.write().await.set_absolute(pose);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "position reply unparseable; keeping last known pose");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Query the attitude report; the reply is logged only.
    pub async fn log_attitude(&self) -> AppResult<()> {
        self.rover.query_attitude().await.map(|_| ())
    }

    async fn timed_axis_move(
        &self,
        axis: Axis,
        displacement: f64,
        speed: f64,
        token: &CancellationToken,
    ) -> AppResult<()> {
        if speed == 0.0 {
            return Err(RoverError::InvalidParameter(format!(
                "zero speed for {} move of {}",
                axis, displacement
            )));
        }

        let travel = travel_time(displacement, speed)?;
        let velocity = signed_velocity(displacement, speed);

        let started = self.rover.set_velocity(axis, velocity).await;
        let mut cancelled = false;
        if started.is_ok() {
            tokio::select! {
                _ = sleep(travel) => {}
                _ = token.cancelled() => cancelled = true,
            }
        }

        // Stop on every path: even a failed or unacknowledged velocity
        // command may have been applied by the chassis.
        let stopped = self.rover.stop(axis).await;
        started?;
        stopped?;

        if cancelled {
            debug!(%axis, displacement, "move cancelled after stop");
            return Err(RoverError::Cancelled);
        }

        self.tracker.write().await.accumulate(axis, displacement);
        debug!(
            %axis,
            displacement,
            velocity,
            travel_secs = travel.as_secs_f64(),
            "move complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn travel_time_is_distance_over_speed() {
        assert_eq!(travel_time(1.0, 0.2).unwrap(), Duration::from_secs(5));
        assert_eq!(travel_time(-1.0, 0.2).unwrap(), Duration::from_secs(5));
        assert_eq!(travel_time(-90.0, 30.0).unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn travel_time_rejects_unrepresentable_quotients() {
        assert!(travel_time(4.0e18, 0.2).is_err());
        assert!(travel_time(1.0, 0.0).is_err());
        assert!(matches!(
            travel_time(f64::NAN, 0.2),
            Err(RoverError::InvalidParameter(_))
        ));
    }

    #[test]
    fn velocity_sign_follows_displacement() {
        assert_eq!(signed_velocity(1.0, 0.2), 0.2);
        assert_eq!(signed_velocity(-1.0, 0.2), -0.2);
        assert_eq!(signed_velocity(-1.0, -0.2), -0.2);
        assert_eq!(signed_velocity(2.0, -0.5), 0.5);
    }

    #[test]
    fn move_builders_set_one_axis() {
        let forward = Move::x(1.05);
        assert_eq!(forward.x, 1.05);
        assert_eq!(forward.y, 0.0);
        assert_eq!(forward.speed, DEFAULT_SPEED);

        let lateral = Move::y(0.1).with_speed(0.1);
        assert_eq!(lateral.y, 0.1);
        assert_eq!(lateral.speed, 0.1);

        let turn = Move::turn(-90.0);
        assert_eq!(turn.z, -90.0);
        assert_eq!(turn.turn_speed, DEFAULT_TURN_SPEED);
    }
}
