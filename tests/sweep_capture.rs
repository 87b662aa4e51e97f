//! Integration tests for the sweep capture pipeline against the mock
//! instrument server.
//!
//! The mock records every SCPI command with its arrival time, which lets
//! these tests pin down ordering guarantees: the session-directory
//! precondition runs before any instrument traffic, configuration precedes
//! polling, and no trace query is issued after the duration limit.

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use rover_gpr::capture::SweepCapture;
use rover_gpr::error::RoverError;
use rover_gpr::hardware::mock::MockVna;

const SETUP_PREFIX: [&str; 11] = [
    "*IDN?",
    ":DEV:CONN",
    ":DEV:CONN?",
    ":DEV:MODE VNA",
    ":VNA:SWEEP FREQUENCY",
    ":VNA:STIM:LVL -10",
    ":VNA:ACQ:IFBW 10000",
    ":VNA:ACQ:AVG 1",
    ":VNA:ACQ:POINTS 101",
    ":VNA:FREQ:START 1000000000",
    ":VNA:FREQ:STOP 2000000000",
];

async fn capture_over_mock() -> (MockVna, TempDir, SweepCapture) {
    let mock = MockVna::spawn().await.unwrap();
    let data_dir = TempDir::new().unwrap();
    let capture = SweepCapture::new(
        mock.instrument_settings(),
        MockVna::capture_settings(data_dir.path().to_path_buf()),
    );
    (mock, data_dir, capture)
}

fn csv_files(session_dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(session_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().map(|e| e == "csv").unwrap_or(false))
        .collect();
    files.sort();
    files
}

// =============================================================================
// Preconditions and configuration sequence
// =============================================================================

#[tokio::test]
async fn test_existing_session_dir_fails_before_any_instrument_traffic() {
    let (mock, data_dir, capture) = capture_over_mock().await;

    tokio::fs::create_dir_all(data_dir.path().join("stale"))
        .await
        .unwrap();

    let result = capture.run("stale", None).await;
    assert!(matches!(result, Err(RoverError::SessionExists(_))));
    assert!(
        mock.commands().await.is_empty(),
        "precondition failure must not touch the instrument"
    );
}

#[tokio::test]
async fn test_capture_configures_polls_then_queries_in_order() {
    let (mock, data_dir, capture) = capture_over_mock().await;

    let report = capture
        .run("ordered", Some(Duration::from_millis(100)))
        .await
        .unwrap();

    let commands = mock.commands().await;
    assert!(commands.len() > SETUP_PREFIX.len());
    assert_eq!(&commands[..SETUP_PREFIX.len()], &SETUP_PREFIX);

    // Default mock answers FALSE twice before TRUE
    assert_eq!(commands[11], ":VNA:ACQ:FIN?");
    assert_eq!(commands[12], ":VNA:ACQ:FIN?");
    assert_eq!(commands[13], ":VNA:ACQ:FIN?");
    assert!(commands[14..]
        .iter()
        .all(|c| c == ":VNA:TRACE:DATA? S21"));

    assert!(report.samples_written >= 1);
    assert_eq!(report.write_failures, 0);

    // One CSV per sample, 101 generated points per sweep
    let files = csv_files(&data_dir.path().join("ordered"));
    assert_eq!(files.len(), report.samples_written);
    let rows = std::fs::read_to_string(&files[0]).unwrap();
    assert_eq!(rows.lines().count(), 101);
}

#[tokio::test]
async fn test_unavailable_device_aborts_with_empty_session() {
    let (mock, data_dir, capture) = capture_over_mock().await;
    mock.set_device_reply("Not connected").await;

    let result = capture.run("aborted", None).await;
    assert!(matches!(result, Err(RoverError::InstrumentUnavailable)));

    // The directory was created (precondition passed) but stays empty and
    // the instrument was never configured
    assert!(csv_files(&data_dir.path().join("aborted")).is_empty());
    assert!(!mock
        .commands()
        .await
        .iter()
        .any(|c| c.starts_with(":VNA:")));
}

// =============================================================================
// Deadline and cancellation
// =============================================================================

#[tokio::test]
async fn test_no_trace_query_after_duration_limit() {
    let (mock, _data_dir, capture) = capture_over_mock().await;

    let limit = Duration::from_millis(80);
    let report = capture.run("deadline", Some(limit)).await.unwrap();
    assert!(report.samples_written >= 2);

    let queries = mock.trace_query_times().await;
    assert!(queries.len() >= 2);
    let spread = *queries.last().unwrap() - queries[0];
    assert!(
        spread <= limit + Duration::from_millis(60),
        "trace queries spread over {:?}, limit was {:?}",
        spread,
        limit
    );
}

#[tokio::test]
async fn test_cancellation_ends_acquisition_promptly() {
    let (mock, _data_dir, capture) = capture_over_mock().await;
    let token = CancellationToken::new();
    let capture = capture.with_cancellation(token.clone());

    tokio::spawn(async move {
        sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    let start = Instant::now();
    // No duration limit: only the token ends this run
    let report = capture.run("cancelled", None).await.unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(600),
        "cancellation should end the run, took {:?}",
        start.elapsed()
    );
    assert!(report.samples_written >= 1);

    // Nothing queried after the token fired
    sleep(Duration::from_millis(100)).await;
    let queries_then = mock.trace_query_times().await.len();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.trace_query_times().await.len(), queries_then);
}

#[tokio::test]
async fn test_unlimited_run_accounts_for_every_write_at_cancel() {
    let (_mock, data_dir, capture) = capture_over_mock().await;
    let token = CancellationToken::new();
    let capture = capture.with_cancellation(token.clone());

    tokio::spawn(async move {
        sleep(Duration::from_millis(250)).await;
        token.cancel();
    });

    // Long enough for writers to finish and be reaped while acquisition
    // is still looping
    let report = capture.run("unlimited", None).await.unwrap();

    assert!(report.samples_written >= 5);
    assert_eq!(report.write_failures, 0);
    assert_eq!(
        csv_files(&data_dir.path().join("unlimited")).len(),
        report.samples_written
    );
}

// =============================================================================
// Payload handling
// =============================================================================

#[tokio::test]
async fn test_garbled_payload_is_counted_and_skipped() {
    let (mock, data_dir, capture) = capture_over_mock().await;
    // Length 4 is not a multiple of 3: parse failure, not a fatal error
    mock.queue_trace_payload("[1000000,1.0,2.0,3000000]").await;

    let report = capture
        .run("garbled", Some(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(report.parse_failures >= 1);
    assert!(report.samples_written >= 1);
    assert_eq!(
        csv_files(&data_dir.path().join("garbled")).len(),
        report.samples_written
    );
}

#[tokio::test]
async fn test_known_payload_lands_in_csv_rows() {
    let (mock, data_dir, capture) = capture_over_mock().await;
    mock.queue_trace_payload("[1000000,1.0,2.0,2000000,0.5,-0.5]")
        .await;

    capture
        .run("known", Some(Duration::from_millis(30)))
        .await
        .unwrap();

    // The queued two-point sweep is distinguishable from generated
    // 101-point sweeps by its row count
    let files = csv_files(&data_dir.path().join("known"));
    let two_point = files
        .iter()
        .map(|f| std::fs::read_to_string(f).unwrap())
        .find(|rows| rows.lines().count() == 2)
        .expect("queued payload never written");
    let rows: Vec<&str> = two_point.lines().collect();
    assert_eq!(rows, vec!["1000000,1,2", "2000000,0.5,-0.5"]);
}
