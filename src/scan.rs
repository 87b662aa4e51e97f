//! Scan lifecycle supervision.
//!
//! At most one scan runs at a time. The supervisor enforces that two ways:
//! a run lock held by the scan task for its entire run, and a stored handle
//! to the active task. `start` while a scan is active cancels the old task
//! and waits for it to terminate before spawning the new one, so tasks
//! never overlap even across restarts.
//!
//! Cancellation is cooperative. The token is observed at every suspension
//! point inside motion and capture; a cancelled task still unwinds through
//! its teardown (axis stop, protocol `quit`) before the handle resolves,
//! and both `start` and `cancel` await that handle. Teardown failures are
//! logged, never propagated.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capture::SweepCapture;
use crate::config::Settings;
use crate::data::storage::timestamp_name;
use crate::error::{AppResult, RoverError};
use crate::hardware::rover::RoverClient;
use crate::motion::pattern::{self, Pattern};
use crate::motion::position::{Pose, PositionTracker};
use crate::motion::{travel_time, MotionSequencer};

/// Parameters of one scan run.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScanParams {
    /// Nominal grid distance in meters
    #[serde(default = "default_distance")]
    pub distance: f64,
    /// Pattern to drive
    #[serde(default)]
    pub pattern: Pattern,
    /// Record a sweep session during line runs
    #[serde(default, alias = "record_gpr")]
    pub record: bool,
}

fn default_distance() -> f64 {
    1.0
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            distance: default_distance(),
            pattern: Pattern::default(),
            record: false,
        }
    }
}

/// Supervisor view for the control API: relative accumulators on top,
/// matching what the survey front end plots.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub absolute: Pose,
    pub is_running: bool,
    pub scan_id: Option<Uuid>,
}

struct ActiveScan {
    id: Uuid,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the scan lifecycle for one connected vehicle.
pub struct ScanSupervisor {
    rover: Arc<RoverClient>,
    tracker: Arc<RwLock<PositionTracker>>,
    settings: Arc<Settings>,
    run_lock: Arc<Mutex<()>>,
    active: Mutex<Option<ActiveScan>>,
}

impl ScanSupervisor {
    pub fn new(rover: Arc<RoverClient>, settings: Arc<Settings>) -> Self {
        Self {
            rover,
            tracker: Arc::new(RwLock::new(PositionTracker::new())),
            settings,
            run_lock: Arc::new(Mutex::new(())),
            active: Mutex::new(None),
        }
    }

    /// Start a scan, replacing any active one.
    ///
    /// A previous task is cancelled and *awaited* before the new task is
    /// spawned. Relative accumulators restart from zero.
    pub async fn start(&self, params: ScanParams) -> AppResult<Uuid> {
        if params.distance <= 0.0 || !params.distance.is_finite() {
            return Err(RoverError::InvalidParameter(format!(
                "distance must be positive, got {}",
                params.distance
            )));
        }
        pattern::validate_legs(params.pattern, params.distance)?;

        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            info!(scan_id = %prev.id, "replacing active scan");
            prev.token.cancel();
            if let Err(e) = prev.handle.await {
                warn!(error = %e, "previous scan task join failed");
            }
        }

        self.tracker.write().await.reset_relative();

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let rover = self.rover.clone();
        let tracker = self.tracker.clone();
        let settings = self.settings.clone();
        let run_lock = self.run_lock.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let _run = run_lock.lock().await;
            match execute(rover, tracker, &settings, params, &task_token).await {
                Ok(()) => info!(scan_id = %id, "scan completed"),
                Err(RoverError::Cancelled) => info!(scan_id = %id, "scan cancelled"),
                Err(e) => error!(scan_id = %id, error = %e, "scan failed"),
            }
        });

        *active = Some(ActiveScan { id, token, handle });
        info!(
            scan_id = %id,
            distance = params.distance,
            pattern = %params.pattern,
            record = params.record,
            "scan started"
        );
        Ok(id)
    }

    /// Cancel the active scan, if any.
    ///
    /// Accumulators reset first, then the terminating command goes out,
    /// then the task is cancelled and awaited. Safe to call when idle.
    pub async fn cancel(&self) -> AppResult<()> {
        self.tracker.write().await.reset_relative();

        if let Err(e) = self.rover.quit().await {
            warn!(error = %e, "failed to send quit while cancelling");
        }

        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            info!(scan_id = %prev.id, "cancelling scan");
            prev.token.cancel();
            if let Err(e) = prev.handle.await {
                warn!(error = %e, "scan task join failed");
            }
        }
        Ok(())
    }

    /// Current accumulators and lifecycle state.
    pub async fn status(&self) -> ScanStatus {
        let report = self.tracker.read().await.report();
        let active = self.active.lock().await;
        let is_running = active
            .as_ref()
            .map(|scan| !scan.handle.is_finished())
            .unwrap_or(false);
        ScanStatus {
            x: report.x,
            y: report.y,
            z: report.z,
            absolute: report.absolute,
            is_running,
            scan_id: active.as_ref().filter(|_| is_running).map(|scan| scan.id),
        }
    }
}

/// Run one scan end to end: preamble, pattern, teardown.
///
/// Also the entry point for one-shot CLI scans, which pass a ctrl-c-driven
/// token instead of a supervisor-held one. The terminating `quit` goes out
/// on every path; its failure is logged, not propagated.
pub async fn execute(
    rover: Arc<RoverClient>,
    tracker: Arc<RwLock<PositionTracker>>,
    settings: &Settings,
    params: ScanParams,
    token: &CancellationToken,
) -> AppResult<()> {
    let seq = MotionSequencer::new(rover.clone(), tracker);
    let result = run_pattern(&rover, &seq, settings, params, token).await;

    if let Err(e) = rover.quit().await {
        warn!(error = %e, "failed to send quit during teardown");
    }

    result
}

async fn run_pattern(
    rover: &RoverClient,
    seq: &MotionSequencer,
    settings: &Settings,
    params: ScanParams,
    token: &CancellationToken,
) -> AppResult<()> {
    rover.enter_command_mode().await?;
    rover
        .set_push_frequency(settings.vehicle.push_frequency_hz)
        .await?;
    seq.refresh_position().await?;

    match params.pattern {
        Pattern::Square => {
            if params.record {
                warn!("sweep recording applies to line scans only; ignoring record flag");
            }
            pattern::run_square(seq, params.distance, token).await
        }
        Pattern::Line => {
            let mv = pattern::line_move(params.distance);
            if !params.record {
                return seq.move_relative(&mv, token).await;
            }

            let duration = travel_time(mv.x, mv.speed)?;
            let session = timestamp_name(Utc::now());
            let capture =
                SweepCapture::new(settings.instrument.clone(), settings.capture.clone())
                    .with_cancellation(token.clone());
            info!(
                session = %session,
                secs = duration.as_secs_f64(),
                "recording sweep alongside line run"
            );

            let (move_result, capture_result) = tokio::join!(
                seq.move_relative(&mv, token),
                capture.run(&session, Some(duration)),
            );

            // A failed recording does not undo the completed move
            match capture_result {
                Ok(report) => info!(
                    samples = report.samples_written,
                    session = %session,
                    "line recording finished"
                ),
                Err(e) => warn!(error = %e, "line recording failed"),
            }

            move_result
        }
    }
}
