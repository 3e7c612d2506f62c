//! Sliding window counter rotated lazily on each call.

use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::backend::{Decision, Limiter};
use super::window::{overflow, WindowPair};
use crate::clock::{Clock, SystemClock};
use crate::config::SlidingWindowConfig;
use crate::error::{Result, SluiceError};

/// A two-window sliding counter without a background task.
///
/// Every call first works out how many whole intervals have passed since
/// the current window opened and slides the windows accordingly. Suited to
/// call rates well below one per interval, where a rotation task would
/// mostly idle.
#[derive(Debug)]
pub struct SyncSlidingWindow<C: Clock = SystemClock> {
    windows: WindowPair,
    interval: Duration,
    capacity: u64,
    clock: C,
}

impl SyncSlidingWindow<SystemClock> {
    pub fn new(config: SlidingWindowConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SyncSlidingWindow<C> {
    pub fn with_clock(config: SlidingWindowConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let interval = config.interval()?;

        Ok(Self {
            windows: WindowPair::starting_at(clock.now(), interval),
            interval,
            capacity: config.capacity,
            clock,
        })
    }

    /// Admit `n`, or fail with `WindowFull` leaving the counts unchanged.
    pub fn add_n(&mut self, n: u64) -> Result<bool> {
        match self.check(n) {
            0 => Ok(true),
            _ => Err(SluiceError::WindowFull),
        }
    }

    /// Counts of the previous and current windows, after sliding.
    pub fn count(&mut self) -> (u64, u64) {
        let now = self.clock.now();
        self.adjust(now);
        self.windows.counts()
    }

    /// Admission check returning the overflow amount (0 when admitted).
    fn check(&mut self, n: u64) -> u64 {
        let now = self.clock.now();
        self.adjust(now);

        let estimate = self.windows.estimate(now, self.interval).round() as u64;
        trace!(estimate, requested = n, capacity = self.capacity, "Sync window check");

        let spillover = overflow(estimate, n, self.capacity);
        if spillover > 0 {
            debug!(
                estimate,
                requested = n,
                capacity = self.capacity,
                "Sync window rejected request"
            );
            return spillover;
        }

        self.windows.curr.count = self.windows.curr.count.saturating_add(n);
        0
    }

    fn slides(&self, now: Instant) -> u128 {
        let elapsed = now.saturating_duration_since(self.windows.curr.start);
        elapsed.as_nanos() / self.interval.as_nanos()
    }

    fn adjust(&mut self, now: Instant) {
        match self.slides(now) {
            0 => {}
            1 => {
                trace!("Sync window slid by one interval");
                self.windows.rotate(now);
            }
            n => {
                trace!(slides = n as u64, "Sync window expired both windows");
                self.windows.reset(now, self.interval);
            }
        }
    }
}

impl<C: Clock> Limiter for SyncSlidingWindow<C> {
    fn admit(&mut self, weight: u64) -> Result<Decision> {
        match self.check(weight) {
            0 => Ok(Decision::allowed(weight)),
            spillover => Ok(Decision::rejected(weight, spillover)),
        }
    }
}
