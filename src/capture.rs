//! Sweep capture pipeline.
//!
//! One capture run owns one session directory and one instrument
//! connection. The flow is: create the session directory (failing fast if
//! it exists, before any instrument traffic), configure the sweep, wait for
//! the first sweep to finish, then loop querying the trace. Parsed samples
//! are handed to a bounded pool of blocking writers so disk latency never
//! stalls acquisition; finished writers are reaped as the loop proceeds,
//! and the run returns only after every write completes, on error paths
//! included.
//!
//! The loop is paced: a query+parse cycle faster than the configured floor
//! suspends for the remainder, keeping the sample rate roughly even. A
//! duration limit stops new queries once elapsed; cancellation does the
//! same.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CaptureSettings, InstrumentSettings};
use crate::data::storage;
use crate::data::trace::Sample;
use crate::error::{AppResult, RoverError};
use crate::hardware::vna::VnaClient;

/// Outcome of one capture run.
#[derive(Debug)]
pub struct CaptureReport {
    pub session_dir: PathBuf,
    pub samples_written: usize,
    pub parse_failures: usize,
    pub write_failures: usize,
    pub elapsed: Duration,
}

/// One-session sweep capture.
pub struct SweepCapture {
    instrument: InstrumentSettings,
    capture: CaptureSettings,
    token: CancellationToken,
}

impl SweepCapture {
    pub fn new(instrument: InstrumentSettings, capture: CaptureSettings) -> Self {
        Self {
            instrument,
            capture,
            token: CancellationToken::new(),
        }
    }

    /// Stop querying when this token fires (writes still drain).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Run one capture session.
    ///
    /// With a `duration_limit`, no trace query is issued after the limit
    /// elapses; without one, the loop runs until cancellation. Either way
    /// the call returns only once every submitted write has completed.
    pub async fn run(
        &self,
        session_name: &str,
        duration_limit: Option<Duration>,
    ) -> AppResult<CaptureReport> {
        // Precondition comes first: a stale directory must not cost a
        // configured sweep.
        let session_dir =
            storage::create_session_dir(&self.capture.data_dir, session_name).await?;
        info!(session = session_name, dir = %session_dir.display(), "capture session started");

        let vna = VnaClient::connect(&self.instrument).await?;
        vna.identify().await?;
        vna.ensure_device_connected().await?;
        vna.configure(&self.instrument).await?;
        vna.wait_sweep_finished(self.capture.finished_poll, &self.token)
            .await?;

        let started = Instant::now();
        let mut pool = WriterPool::new(self.capture.writer_concurrency);
        let mut parse_failures = 0usize;

        let loop_result = self
            .acquire_loop(
                &vna,
                &session_dir,
                duration_limit,
                started,
                &mut pool,
                &mut parse_failures,
            )
            .await;

        // Settle every outstanding write, also when the loop failed
        pool.drain().await;
        loop_result?;

        let report = CaptureReport {
            session_dir,
            samples_written: pool.samples_written,
            parse_failures,
            write_failures: pool.write_failures,
            elapsed: started.elapsed(),
        };
        info!(
            samples = report.samples_written,
            parse_failures = report.parse_failures,
            write_failures = report.write_failures,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "capture session finished"
        );
        Ok(report)
    }

    async fn acquire_loop(
        &self,
        vna: &VnaClient,
        session_dir: &PathBuf,
        duration_limit: Option<Duration>,
        started: Instant,
        pool: &mut WriterPool,
        parse_failures: &mut usize,
    ) -> AppResult<()> {
        loop {
            if let Some(limit) = duration_limit {
                if started.elapsed() >= limit {
                    debug!("duration limit reached; no further queries");
                    return Ok(());
                }
            }
            if self.token.is_cancelled() {
                debug!("capture cancelled; no further queries");
                return Ok(());
            }

            let cycle_started = Instant::now();
            let queried_at = Utc::now();
            let payload = match vna.read_trace().await? {
                Some(payload) => payload,
                None => {
                    warn!("trace query timed out; sample skipped");
                    self.pace(cycle_started).await;
                    continue;
                }
            };
            debug!(
                query_ms = cycle_started.elapsed().as_millis() as u64,
                "trace received"
            );

            match vna.parse_trace(&payload) {
                Ok(points) => {
                    let sample = Sample {
                        captured_at: queried_at,
                        points,
                    };
                    pool.submit(session_dir.clone(), sample).await?;
                }
                Err(e) if e.is_recoverable() => {
                    *parse_failures += 1;
                    warn!(error = %e, "malformed trace payload; sample skipped");
                }
                Err(e) => return Err(e),
            }

            self.pace(cycle_started).await;
        }
    }

    async fn pace(&self, cycle_started: Instant) {
        let elapsed = cycle_started.elapsed();
        if elapsed < self.capture.min_cycle {
            sleep(self.capture.min_cycle - elapsed).await;
        }
    }
}

/// Bounded pool of blocking sample writers.
///
/// Submission waits for a semaphore slot while the pool is saturated; that
/// back-pressure is what bounds memory under slow disks. Each submission
/// first reaps writers that already finished, so an unlimited run never
/// accumulates completed task handles, and `drain` settles the rest.
struct WriterPool {
    permits: Arc<Semaphore>,
    writes: JoinSet<AppResult<PathBuf>>,
    samples_written: usize,
    write_failures: usize,
}

impl WriterPool {
    fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            writes: JoinSet::new(),
            samples_written: 0,
            write_failures: 0,
        }
    }

    async fn submit(&mut self, dir: PathBuf, sample: Sample) -> AppResult<()> {
        while let Some(joined) = self.writes.try_join_next() {
            self.settle(joined);
        }
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RoverError::Storage("writer pool closed".to_string()))?;
        self.writes.spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || storage::write_sample(&dir, &sample)).await?;
            drop(permit);
            result
        });
        Ok(())
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.writes.join_next().await {
            self.settle(joined);
        }
    }

    fn settle(&mut self, joined: Result<AppResult<PathBuf>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(path)) => {
                self.samples_written += 1;
                debug!(file = %path.display(), "sample written");
            }
            Ok(Err(e)) => {
                self.write_failures += 1;
                warn!(error = %e, "sample write failed");
            }
            Err(e) => {
                self.write_failures += 1;
                warn!(error = %e, "writer task failed");
            }
        }
    }
}
