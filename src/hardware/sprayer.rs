//! Auxiliary sprayer output.
//!
//! The physical sprayer is a digital output driven by an external pin
//! driver; the core only defines the boundary. [`Sprayer::pulse`] holds the
//! output high for a duration and guarantees the low transition on every
//! exit path, because a sprayer left running empties its tank.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use crate::error::AppResult;

/// Default pulse length in seconds.
pub const DEFAULT_PULSE_SECS: f64 = 0.1;

/// A switchable output.
#[async_trait]
pub trait Sprayer: Send + Sync {
    /// Drive the output high or low.
    async fn set_active(&self, on: bool) -> AppResult<()>;

    /// Whether the output is currently high.
    fn is_active(&self) -> bool;

    /// Hold the output high for `duration`, then release it.
    ///
    /// The low transition is attempted even when the high transition or the
    /// wait failed, so the output cannot stay latched on.
    async fn pulse(&self, duration: Duration) -> AppResult<()> {
        let raised = self.set_active(true).await;
        if raised.is_ok() {
            sleep(duration).await;
        }
        let released = self.set_active(false).await;
        raised?;
        released
    }
}

/// Software stand-in used when no pin driver is wired up: logs transitions
/// and tracks state so the control API stays exercisable on a bench.
#[derive(Debug, Default)]
pub struct SoftwareSprayer {
    active: AtomicBool,
}

impl SoftwareSprayer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sprayer for SoftwareSprayer {
    async fn set_active(&self, on: bool) -> AppResult<()> {
        self.active.store(on, Ordering::SeqCst);
        info!(active = on, "sprayer output");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RoverError;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn pulse_raises_then_releases() {
        let sprayer = SoftwareSprayer::new();
        let started = tokio::time::Instant::now();
        sprayer.pulse(Duration::from_millis(50)).await.unwrap();
        assert!(!sprayer.is_active());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    /// Fails the high transition; the low transition must still happen.
    struct FailingOn {
        transitions: AtomicUsize,
    }

    #[async_trait]
    impl Sprayer for FailingOn {
        async fn set_active(&self, on: bool) -> AppResult<()> {
            self.transitions.fetch_add(1, Ordering::SeqCst);
            if on {
                Err(RoverError::InvalidParameter("output stuck".to_string()))
            } else {
                Ok(())
            }
        }

        fn is_active(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn failed_raise_still_attempts_release() {
        let sprayer = FailingOn {
            transitions: AtomicUsize::new(0),
        };
        let err = sprayer.pulse(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, RoverError::InvalidParameter(_)));
        // Both the high and the low transition were attempted
        assert_eq!(sprayer.transitions.load(Ordering::SeqCst), 2);
    }
}
