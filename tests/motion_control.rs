//! Integration tests for timed-velocity motion against the mock vehicle.
//!
//! These verify the motion contract end to end over a real socket: command
//! strings on the wire, move timing, velocity sign handling, the
//! unconditional stop, and accumulator bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use rover_gpr::hardware::mock::MockVehicle;
use rover_gpr::hardware::rover::RoverClient;
use rover_gpr::motion::position::{PositionTracker, Pose};
use rover_gpr::motion::{Move, MotionSequencer};

async fn sequencer_over_mock() -> (MockVehicle, MotionSequencer, Arc<RwLock<PositionTracker>>) {
    let mock = MockVehicle::spawn().await.unwrap();
    let rover = Arc::new(RoverClient::connect(&mock.vehicle_settings()).await.unwrap());
    let tracker = Arc::new(RwLock::new(PositionTracker::default()));
    let seq = MotionSequencer::new(rover, tracker.clone());
    (mock, seq, tracker)
}

// =============================================================================
// Timing and wire commands
// =============================================================================

#[tokio::test]
async fn test_move_duration_matches_distance_over_speed() {
    let (mock, seq, tracker) = sequencer_over_mock().await;
    let token = CancellationToken::new();

    // 0.2 m at 0.2 m/s should take ~1000ms
    let start = Instant::now();
    seq.move_relative(&Move::x(0.2), &token).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed.as_millis() >= 1000 && elapsed.as_millis() <= 1400,
        "expected ~1000ms, got {}ms",
        elapsed.as_millis()
    );
    assert_eq!(
        mock.commands().await,
        vec!["chassis speed x 0.2".to_string(), "chassis speed x 0".to_string()]
    );
    assert_eq!(tracker.read().await.relative().x, 0.2);
}

#[tokio::test]
async fn test_negative_displacement_commands_negative_velocity() {
    let (mock, seq, tracker) = sequencer_over_mock().await;
    let token = CancellationToken::new();

    let start = Instant::now();
    seq.move_relative(&Move::x(-0.1), &token).await.unwrap();
    let elapsed = start.elapsed();

    // 0.1 m at 0.2 m/s: ~500ms regardless of direction
    assert!(
        elapsed.as_millis() >= 500 && elapsed.as_millis() <= 900,
        "expected ~500ms, got {}ms",
        elapsed.as_millis()
    );
    assert_eq!(
        mock.commands().await,
        vec![
            "chassis speed x -0.2".to_string(),
            "chassis speed x 0".to_string()
        ]
    );
    assert_eq!(tracker.read().await.relative().x, -0.1);
}

#[tokio::test]
async fn test_turn_uses_z_axis_and_turn_speed() {
    let (mock, seq, tracker) = sequencer_over_mock().await;
    let token = CancellationToken::new();

    // 30 degrees at 30 deg/s: ~1s
    let start = Instant::now();
    seq.move_relative(&Move::turn(-30.0), &token).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed.as_millis() >= 1000 && elapsed.as_millis() <= 1400,
        "expected ~1000ms, got {}ms",
        elapsed.as_millis()
    );
    assert_eq!(
        mock.commands().await,
        vec![
            "chassis speed z -30".to_string(),
            "chassis speed z 0".to_string()
        ]
    );
    assert_eq!(tracker.read().await.relative().z, -30.0);
}

// =============================================================================
// Cancellation and axis arbitration
// =============================================================================

#[tokio::test]
async fn test_cancelled_move_stops_and_does_not_accumulate() {
    let (mock, seq, tracker) = sequencer_over_mock().await;
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    // Would take 5s uncancelled
    let start = Instant::now();
    let result = seq.move_relative(&Move::x(1.0), &token).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(rover_gpr::error::RoverError::Cancelled)));
    assert!(
        elapsed.as_millis() < 1000,
        "cancellation should cut the move short, took {}ms",
        elapsed.as_millis()
    );
    // Stop still went out
    assert_eq!(
        mock.commands().await,
        vec!["chassis speed x 0.2".to_string(), "chassis speed x 0".to_string()]
    );
    // Partial moves are not accounted
    assert_eq!(tracker.read().await.relative().x, 0.0);
}

#[tokio::test]
async fn test_both_linear_axes_proceeds_with_x_only() {
    let (mock, seq, tracker) = sequencer_over_mock().await;
    let token = CancellationToken::new();

    let mv = Move {
        x: 0.1,
        y: 0.3,
        ..Move::default()
    };
    seq.move_relative(&mv, &token).await.unwrap();

    let commands = mock.commands().await;
    assert!(commands.iter().all(|c| !c.contains("speed y")), "{commands:?}");
    assert_eq!(tracker.read().await.relative().x, 0.1);
    assert_eq!(tracker.read().await.relative().y, 0.0);
}

#[tokio::test]
async fn test_zero_speed_is_rejected() {
    let (_mock, seq, _tracker) = sequencer_over_mock().await;
    let token = CancellationToken::new();

    let result = seq
        .move_relative(&Move::x(0.5).with_speed(0.0), &token)
        .await;
    assert!(matches!(
        result,
        Err(rover_gpr::error::RoverError::InvalidParameter(_))
    ));
}

// =============================================================================
// Position refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_position_updates_absolute_pose() {
    let (mock, seq, tracker) = sequencer_over_mock().await;

    mock.set_position_reply("1.5 -2.0 30.0").await;
    seq.refresh_position().await.unwrap();
    assert_eq!(
        tracker.read().await.absolute(),
        Pose {
            x: 1.5,
            y: -2.0,
            z: 30.0
        }
    );
}

#[tokio::test]
async fn test_garbled_position_reply_keeps_last_known_pose() {
    let (mock, seq, tracker) = sequencer_over_mock().await;

    mock.set_position_reply("1.0 2.0 3.0").await;
    seq.refresh_position().await.unwrap();

    mock.set_position_reply("ok done").await;
    // Still Ok: a bad reply is skipped, not fatal
    seq.refresh_position().await.unwrap();

    assert_eq!(
        tracker.read().await.absolute(),
        Pose {
            x: 1.0,
            y: 2.0,
            z: 3.0
        }
    );
}
