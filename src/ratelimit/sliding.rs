//! Sliding window counter rotated by a background task.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use super::backend::{Decision, Limiter};
use super::window::{overflow, WindowPair};
use crate::clock::{Clock, TokioClock};
use crate::config::SlidingWindowConfig;
use crate::error::{Result, SluiceError};

#[derive(Debug)]
struct WindowState {
    windows: WindowPair,
    stopped: bool,
}

/// A two-window sliding counter whose windows are rotated by a Tokio task.
///
/// The task sleeps until the current window ends, then moves `curr` into
/// `prev` and opens a fresh `curr`. Rotation and [`add_n`](Self::add_n)
/// share one lock, so a rotation never lands in the middle of an admission.
///
/// States: active until [`stop`](Self::stop), stopped afterwards. Stopping
/// is terminal and idempotent.
#[derive(Debug)]
pub struct AsyncSlidingWindow<C: Clock + Clone = TokioClock> {
    state: Arc<Mutex<WindowState>>,
    interval: Duration,
    capacity: u64,
    clock: C,
    shutdown: watch::Sender<bool>,
}

impl AsyncSlidingWindow<TokioClock> {
    /// Create a window on the current Tokio runtime, driven by Tokio time.
    pub fn new(config: SlidingWindowConfig) -> Result<Self> {
        Self::with_clock(config, TokioClock)
    }
}

impl<C: Clock + Clone> AsyncSlidingWindow<C> {
    /// Create a window with an explicit clock and spawn its rotation task.
    pub fn with_clock(config: SlidingWindowConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let interval = config.interval()?;
        let handle = Handle::try_current()?;

        let state = Arc::new(Mutex::new(WindowState {
            windows: WindowPair::starting_at(clock.now(), interval),
            stopped: false,
        }));
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            interval = ?interval,
            capacity = config.capacity,
            "Starting sliding window rotation"
        );
        handle.spawn(rotate(
            Arc::clone(&state),
            clock.clone(),
            interval,
            shutdown_rx,
        ));

        Ok(Self {
            state,
            interval,
            capacity: config.capacity,
            clock,
            shutdown,
        })
    }

    /// Admit `n` if the interpolated count plus `n` stays within capacity.
    ///
    /// Returns `Ok(false)` on a capacity rejection (nothing is recorded) and
    /// `Err(WindowStopped)` once the window has been stopped.
    pub fn add_n(&self, n: u64) -> Result<bool> {
        self.check(n).map(|spillover| spillover == 0)
    }

    /// Admission check returning the overflow amount (0 when admitted).
    fn check(&self, n: u64) -> Result<u64> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(SluiceError::WindowStopped);
        }

        let now = self.clock.now();
        let estimate = state.windows.estimate(now, self.interval).trunc() as u64;
        trace!(estimate, requested = n, capacity = self.capacity, "Sliding window check");

        let spillover = overflow(estimate, n, self.capacity);
        if spillover > 0 {
            debug!(
                estimate,
                requested = n,
                capacity = self.capacity,
                "Sliding window rejected request"
            );
            return Ok(spillover);
        }

        state.windows.curr.count = state.windows.curr.count.saturating_add(n);
        Ok(0)
    }

    /// Counts of the previous and current windows.
    pub fn get_count(&self) -> (u64, u64) {
        self.state.lock().windows.counts()
    }

    /// Stop the rotation task. Later `add_n` calls fail with `WindowStopped`.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        // The receiver may already be gone if the runtime shut down
        let _ = self.shutdown.send(true);
        info!("Stopped sliding window rotation");
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

impl<C: Clock + Clone> Drop for AsyncSlidingWindow<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Clock + Clone> Limiter for AsyncSlidingWindow<C> {
    fn admit(&mut self, weight: u64) -> Result<Decision> {
        match self.check(weight)? {
            0 => Ok(Decision::allowed(weight)),
            spillover => Ok(Decision::rejected(weight, spillover)),
        }
    }

    fn shutdown(&mut self) {
        self.stop();
    }
}

async fn rotate<C: Clock>(
    state: Arc<Mutex<WindowState>>,
    clock: C,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = {
            let state = state.lock();
            if state.stopped {
                break;
            }
            let elapsed = clock.now().saturating_duration_since(state.windows.curr.start);
            interval.saturating_sub(elapsed)
        };

        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender means the window itself is gone
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {
                let mut state = state.lock();
                if state.stopped {
                    break;
                }
                let now = clock.now();
                state.windows.rotate(now);
                debug!(prev_count = state.windows.prev.count, "Rotated sliding window");
            }
        }
    }
    debug!("Sliding window rotation task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn window(capacity: u64) -> AsyncSlidingWindow {
        AsyncSlidingWindow::new(SlidingWindowConfig::new(capacity, Duration::from_secs(1))).unwrap()
    }

    /// (sleep ms, first add, second add, admitted, prev count, curr count)
    const CASES: [(u64, u64, u64, bool, u64, u64); 6] = [
        (500, 5, 3, true, 0, 8),
        (500, 5, 9, false, 0, 5),
        (1500, 5, 4, true, 5, 4),
        (1500, 5, 10, false, 5, 0),
        (2500, 5, 5, true, 0, 5),
        (2500, 5, 15, false, 0, 0),
    ];

    #[tokio::test(start_paused = true)]
    async fn test_add_across_rotations() {
        for (sleep_ms, first, second, admitted, prev, curr) in CASES {
            let sw = window(10);

            assert!(sw.add_n(first).unwrap());
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

            let got = sw.add_n(second).unwrap();
            sw.stop();

            assert_eq!(got, admitted, "sleep={}ms second={}", sleep_ms, second);
            assert_eq!(sw.get_count(), (prev, curr), "sleep={}ms second={}", sleep_ms, second);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_rotation_moves_count_to_prev() {
        let sw = window(10);
        sw.add_n(5).unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(sw.get_count(), (5, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_at_exact_interval() {
        let sw = window(10);
        sw.add_n(5).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        // Let the rotation task run if its timer fired alongside ours
        tokio::task::yield_now().await;

        assert_eq!(sw.get_count(), (5, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_capacity_saturates_count() {
        let sw = AsyncSlidingWindow::new(SlidingWindowConfig::new(
            u64::MAX,
            Duration::from_secs(1),
        ))
        .unwrap();

        assert!(sw.add_n(u64::MAX).unwrap());
        assert!(sw.add_n(1).unwrap());
        assert_eq!(sw.get_count(), (0, u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_leaves_count_unchanged() {
        let sw = window(10);
        sw.add_n(10).unwrap();
        tokio::time::sleep(Duration::from_millis(950)).await;

        // Estimate is 9.5, truncated to 9
        assert!(!sw.add_n(2).unwrap());
        assert_eq!(sw.get_count(), (0, 10));
        assert!(sw.add_n(1).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_stop_fails() {
        let sw = window(10);
        sw.stop();
        assert!(sw.is_stopped());

        let err = assert_err!(sw.add_n(1));
        assert!(matches!(err, SluiceError::WindowStopped));

        // Second stop is a no-op
        sw.stop();
        assert!(sw.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_rotation_after_stop() {
        let sw = window(10);
        sw.add_n(4).unwrap();
        sw.stop();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sw.get_count(), (0, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_reports_overflow() {
        let mut sw = window(10);

        assert_eq!(sw.admit(7).unwrap(), Decision::allowed(7));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sw.admit(8).unwrap(), Decision::rejected(8, 1));

        sw.shutdown();
        assert!(sw.admit(1).is_err());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result =
            AsyncSlidingWindow::new(SlidingWindowConfig::new(10, Duration::from_secs(1)));
        assert!(matches!(result, Err(SluiceError::NoRuntime(_))));
    }
}
