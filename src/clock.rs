//! Time sources for the limiters.
//!
//! Every limiter reads time through a [`Clock`] so tests can substitute a
//! fixed or manually advanced instant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Clock trait to abstract time retrieval.
///
/// Implementors must be thread-safe and monotonic: successive calls to `now`
/// never go backwards within a limiter's lifetime.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Monotonic system clock. Default for the synchronous limiters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock backed by Tokio's time driver.
///
/// Default for limiters that own a background task, so a paused runtime
/// (`#[tokio::test(start_paused = true)]`) drives both the clock and the
/// task's sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same instant, so a test can hold one handle while the
/// limiter owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a clock frozen at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}
