//! Session directories and per-sample files.
//!
//! Each capture run owns one session directory under the configured data
//! root, named by the run's start timestamp (ISO-8601 UTC). Every sweep
//! sample becomes one CSV file inside it, named by the sample timestamp,
//! with a `frequency,real,imaginary` row per point and no header row (the
//! downstream processing chain indexes columns by position).

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::data::trace::Sample;
use crate::error::{AppResult, RoverError};

/// ISO-8601 UTC name for directories and sample files.
pub fn timestamp_name(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Create the session directory, failing fast if it already exists.
///
/// The parent data root is created as needed; the session directory itself
/// must be fresh. This runs before any instrument command so a stale
/// directory never costs a configured sweep.
pub async fn create_session_dir(data_root: &Path, session_name: &str) -> AppResult<PathBuf> {
    tokio::fs::create_dir_all(data_root)
        .await
        .map_err(|e| RoverError::Storage(format!("failed to create data root: {}", e)))?;

    let session_dir = data_root.join(session_name);
    match tokio::fs::create_dir(&session_dir).await {
        Ok(()) => Ok(session_dir),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(RoverError::SessionExists(session_dir))
        }
        Err(e) => Err(RoverError::Storage(format!(
            "failed to create session directory {}: {}",
            session_dir.display(),
            e
        ))),
    }
}

/// Write one sample file. Blocking; run it on the writer pool.
pub fn write_sample(session_dir: &Path, sample: &Sample) -> AppResult<PathBuf> {
    let path = session_dir.join(format!("{}.csv", timestamp_name(sample.captured_at)));

    let file = File::create(&path)
        .map_err(|e| RoverError::Storage(format!("failed to create {}: {}", path.display(), e)))?;
    let mut writer = csv::Writer::from_writer(file);

    for point in &sample.points {
        writer
            .write_record(&[
                point.frequency_hz.to_string(),
                point.value.re.to_string(),
                point.value.im.to_string(),
            ])
            .map_err(|e| RoverError::Storage(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| RoverError::Storage(e.to_string()))?;

    Ok(path)
}
