//! Commanded-position bookkeeping.
//!
//! The platform drives open loop: moves are timed velocity commands, so the
//! only displacement we can account for is the one we *commanded*. The
//! tracker therefore keeps two things separate:
//!
//! - the last **absolute** pose the vehicle reported (refreshed whenever a
//!   position query parses), and
//! - **relative accumulators** summing every commanded displacement since
//!   the start of the current scan.
//!
//! The accumulators reset exactly when a scan is cancelled or a fresh one
//! starts; nothing resets them implicitly.

use serde::Serialize;

/// A reported vehicle pose: x/y in meters, z (yaw) in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Motion axes addressable by velocity commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    /// Yaw rotation
    Z,
}

impl Axis {
    /// Wire name of the axis in chassis commands.
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute pose plus relative accumulators for the running scan.
#[derive(Debug, Default)]
pub struct PositionTracker {
    absolute: Pose,
    relative: Pose,
}

/// Serializable view of the tracker for the control API. The top-level
/// x/y/z are the relative accumulators, which is what the survey front end
/// plots.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionReport {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub absolute: Pose,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly parsed absolute pose.
    pub fn set_absolute(&mut self, pose: Pose) {
        self.absolute = pose;
    }

    /// Last reported absolute pose.
    pub fn absolute(&self) -> Pose {
        self.absolute
    }

    /// Relative commanded displacement since the last reset.
    pub fn relative(&self) -> Pose {
        self.relative
    }

    /// Add a completed move's commanded displacement on one axis.
    pub fn accumulate(&mut self, axis: Axis, displacement: f64) {
        match axis {
            Axis::X => self.relative.x += displacement,
            Axis::Y => self.relative.y += displacement,
            Axis::Z => self.relative.z += displacement,
        }
    }

    /// Zero the relative accumulators. Called on cancel and on fresh scan
    /// start, never anywhere else.
    pub fn reset_relative(&mut self) {
        self.relative = Pose::default();
    }

    /// Snapshot for the control API.
    pub fn report(&self) -> PositionReport {
        PositionReport {
            x: self.relative.x,
            y: self.relative.y,
            z: self.relative.z,
            absolute: self.absolute,
        }
    }
}
