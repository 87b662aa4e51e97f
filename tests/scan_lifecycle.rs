//! Integration tests for the scan supervisor lifecycle.
//!
//! Single-flight guarantees, accumulator resets, and the always-sent
//! terminating `quit` are all observable through the mock vehicle's command
//! log, so these tests assert against the actual wire traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use rover_gpr::config::Settings;
use rover_gpr::hardware::mock::MockVehicle;
use rover_gpr::hardware::rover::RoverClient;
use rover_gpr::motion::pattern::Pattern;
use rover_gpr::scan::{ScanParams, ScanSupervisor};

async fn supervisor_over_mock() -> (MockVehicle, ScanSupervisor) {
    let mock = MockVehicle::spawn().await.unwrap();
    let mut settings = Settings::default();
    settings.vehicle = mock.vehicle_settings();
    let rover = Arc::new(RoverClient::connect(&settings.vehicle).await.unwrap());
    let supervisor = ScanSupervisor::new(rover, Arc::new(settings));
    (mock, supervisor)
}

async fn wait_until_idle(supervisor: &ScanSupervisor) {
    for _ in 0..200 {
        if !supervisor.status().await.is_running {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("scan did not finish in time");
}

fn line_params(distance: f64) -> ScanParams {
    ScanParams {
        distance,
        pattern: Pattern::Line,
        record: false,
    }
}

// =============================================================================
// Normal lifecycle
// =============================================================================

#[tokio::test]
async fn test_line_scan_runs_preamble_pattern_and_quit() {
    let (mock, supervisor) = supervisor_over_mock().await;

    // 1.05 * 0.05 m at 0.1 m/s: ~525ms of driving
    supervisor.start(line_params(0.05)).await.unwrap();
    wait_until_idle(&supervisor).await;

    assert_eq!(
        mock.commands().await,
        vec![
            "command".to_string(),
            "chassis push freq 10".to_string(),
            "chassis position ?".to_string(),
            "chassis speed x 0.1".to_string(),
            "chassis speed x 0".to_string(),
            "quit".to_string(),
        ]
    );

    let status = supervisor.status().await;
    assert!(!status.is_running);
    assert!(status.scan_id.is_none());
    assert!(
        (status.x - 0.0525).abs() < 1e-9,
        "expected accumulator 0.0525, got {}",
        status.x
    );
}

#[tokio::test]
async fn test_status_reports_running_scan_id() {
    let (_mock, supervisor) = supervisor_over_mock().await;

    let id = supervisor.start(line_params(0.1)).await.unwrap();
    let status = supervisor.status().await;
    assert!(status.is_running);
    assert_eq!(status.scan_id, Some(id));

    wait_until_idle(&supervisor).await;
    assert!(supervisor.status().await.scan_id.is_none());
}

// =============================================================================
// Single-flight replacement
// =============================================================================

#[tokio::test]
async fn test_second_start_cancels_and_awaits_first() {
    let (mock, supervisor) = supervisor_over_mock().await;

    // Square at distance 1.0 would run for minutes uncancelled
    let first = supervisor
        .start(ScanParams {
            distance: 1.0,
            pattern: Pattern::Square,
            record: false,
        })
        .await
        .unwrap();
    sleep(Duration::from_millis(300)).await;

    let second = supervisor.start(line_params(0.05)).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(supervisor.status().await.scan_id, Some(second));

    wait_until_idle(&supervisor).await;

    // The first task's teardown quit must precede the second task's
    // preamble: the supervisor awaited the old task before spawning
    let commands = mock.commands().await;
    let first_quit = commands
        .iter()
        .position(|c| c == "quit")
        .expect("first scan never quit");
    let second_command = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| *c == "command")
        .map(|(i, _)| i)
        .nth(1)
        .expect("second scan never entered command mode");
    assert!(
        first_quit < second_command,
        "expected quit at {} before second preamble at {}: {:?}",
        first_quit,
        second_command,
        commands
    );
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_stops_task_and_resets_accumulators() {
    let (mock, supervisor) = supervisor_over_mock().await;

    supervisor.start(line_params(0.05)).await.unwrap();
    wait_until_idle(&supervisor).await;
    assert!(supervisor.status().await.x > 0.0);

    supervisor.cancel().await.unwrap();

    let status = supervisor.status().await;
    assert!(!status.is_running);
    assert_eq!(status.x, 0.0);
    assert_eq!(status.y, 0.0);
    assert_eq!(status.z, 0.0);

    // Cancel sends its own quit even when nothing is running
    let quits = mock
        .commands()
        .await
        .iter()
        .filter(|c| *c == "quit")
        .count();
    assert_eq!(quits, 2);
}

#[tokio::test]
async fn test_cancel_mid_move_sends_axis_stop_before_quit() {
    let (mock, supervisor) = supervisor_over_mock().await;

    // 1.05 m at 0.1 m/s: ~10.5s uncancelled
    supervisor.start(line_params(1.0)).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    supervisor.cancel().await.unwrap();

    let commands = mock.commands().await;
    let stop = commands
        .iter()
        .position(|c| c == "chassis speed x 0")
        .expect("no axis stop sent");
    let quit = commands
        .iter()
        .rposition(|c| c == "quit")
        .expect("no quit sent");
    assert!(stop < quit, "stop must precede the task teardown: {commands:?}");
    assert_eq!(supervisor.status().await.x, 0.0);
}

// =============================================================================
// Parameter validation
// =============================================================================

#[tokio::test]
async fn test_start_rejects_non_positive_distance() {
    let (_mock, supervisor) = supervisor_over_mock().await;

    for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let result = supervisor
            .start(ScanParams {
                distance: bad,
                pattern: Pattern::Line,
                record: false,
            })
            .await;
        assert!(
            matches!(result, Err(rover_gpr::error::RoverError::InvalidParameter(_))),
            "distance {} should be rejected",
            bad
        );
    }
    assert!(!supervisor.status().await.is_running);
}

#[tokio::test]
async fn test_start_rejects_untimeable_distance_before_any_traffic() {
    let (mock, supervisor) = supervisor_over_mock().await;

    // Finite and positive, but the forward leg would outlast any
    // representable travel time
    let result = supervisor
        .start(ScanParams {
            distance: 4.0e18,
            pattern: Pattern::Square,
            record: false,
        })
        .await;
    assert!(matches!(
        result,
        Err(rover_gpr::error::RoverError::InvalidParameter(_))
    ));
    assert!(
        mock.commands().await.is_empty(),
        "rejected scan must not touch the vehicle"
    );
    assert!(!supervisor.status().await.is_running);
}
