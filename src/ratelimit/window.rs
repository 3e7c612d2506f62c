//! Two-window model shared by the sliding window limiters.

use std::time::{Duration, Instant};

/// A fixed window: when it started and how much weight it has admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Instant,
    pub count: u64,
}

impl Window {
    /// An empty window starting at `start`.
    pub fn new(start: Instant) -> Self {
        Self { start, count: 0 }
    }
}

/// The previous and current windows of a sliding window limiter.
///
/// In steady state `curr.start == prev.start + interval`.
#[derive(Debug, Clone, Copy)]
pub struct WindowPair {
    pub prev: Window,
    pub curr: Window,
}

impl WindowPair {
    /// A fresh pair whose current window starts at `now`.
    pub fn starting_at(now: Instant, interval: Duration) -> Self {
        Self {
            prev: Window::new(now.checked_sub(interval).unwrap_or(now)),
            curr: Window::new(now),
        }
    }

    /// Slide by exactly one window: `curr` becomes `prev` and a new `curr`
    /// starts at `now`.
    pub fn rotate(&mut self, now: Instant) {
        self.prev = self.curr;
        self.curr = Window::new(now);
    }

    /// Discard both windows; used when more than one interval has passed.
    pub fn reset(&mut self, now: Instant, interval: Duration) {
        *self = Self::starting_at(now, interval);
    }

    pub fn counts(&self) -> (u64, u64) {
        (self.prev.count, self.curr.count)
    }

    pub fn estimate(&self, now: Instant, interval: Duration) -> f64 {
        weighted_estimate(&self.prev, &self.curr, now, interval)
    }
}

/// Interpolated request count over the trailing `interval`.
///
/// Assumes requests were spread uniformly within each window: the part of
/// `prev` still inside the trailing interval contributes proportionally,
/// as does the elapsed part of `curr`. Elapsed time in `curr` is clamped to
/// `[0, interval]`.
pub fn weighted_estimate(prev: &Window, curr: &Window, now: Instant, interval: Duration) -> f64 {
    if interval.is_zero() {
        return curr.count as f64;
    }

    let curr_elapsed = now.saturating_duration_since(curr.start).min(interval);
    let curr_fraction = curr_elapsed.as_secs_f64() / interval.as_secs_f64();
    let prev_fraction = 1.0 - curr_fraction;

    prev_fraction * prev.count as f64 + curr_fraction * curr.count as f64
}

/// Amount by which admitting `n` on top of `estimate` would exceed `capacity`.
pub(crate) fn overflow(estimate: u64, n: u64, capacity: u64) -> u64 {
    estimate.saturating_add(n).saturating_sub(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn window(start: Instant, count: u64) -> Window {
        Window { start, count }
    }

    #[test]
    fn test_estimate_at_window_start_is_previous_count() {
        let now = Instant::now();
        let prev = window(now - MINUTE, 8);
        let curr = window(now, 3);

        assert_eq!(weighted_estimate(&prev, &curr, now, MINUTE), 8.0);
    }

    #[test]
    fn test_estimate_halfway_blends_both_windows() {
        let start = Instant::now();
        let prev = window(start - MINUTE, 10);
        let curr = window(start, 4);

        let estimate = weighted_estimate(&prev, &curr, start + Duration::from_secs(30), MINUTE);
        assert!((estimate - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_near_window_end_is_mostly_current() {
        let start = Instant::now();
        let prev = window(start - MINUTE, 5);
        let curr = window(start, 5);

        let estimate = weighted_estimate(&prev, &curr, start + Duration::from_secs(59), MINUTE);
        assert!((estimate - 5.0).abs() < 1e-9);

        let prev = window(start - MINUTE, 0);
        let estimate = weighted_estimate(&prev, &curr, start + Duration::from_secs(54), MINUTE);
        assert!((estimate - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_clamps_elapsed_past_interval() {
        let start = Instant::now();
        let prev = window(start - MINUTE, 100);
        let curr = window(start, 6);

        let estimate = weighted_estimate(&prev, &curr, start + 3 * MINUTE, MINUTE);
        assert_eq!(estimate, 6.0);
    }

    #[test]
    fn test_estimate_before_window_start_counts_previous() {
        let start = Instant::now();
        let prev = window(start, 4);
        let curr = window(start + MINUTE, 2);

        // A clock reading behind `curr.start` is treated as zero elapsed.
        assert_eq!(weighted_estimate(&prev, &curr, start, MINUTE), 4.0);
    }

    #[test]
    fn test_pair_rotate_and_reset() {
        let start = Instant::now();
        let mut pair = WindowPair::starting_at(start, MINUTE);
        pair.curr.count = 7;

        let later = start + MINUTE;
        pair.rotate(later);
        assert_eq!(pair.counts(), (7, 0));
        assert_eq!(pair.prev.start, start);
        assert_eq!(pair.curr.start, later);

        let much_later = later + 5 * MINUTE;
        pair.reset(much_later, MINUTE);
        assert_eq!(pair.counts(), (0, 0));
        assert_eq!(pair.curr.start, much_later);
        assert_eq!(pair.prev.start, much_later - MINUTE);
    }

    #[test]
    fn test_overflow() {
        assert_eq!(overflow(5, 6, 10), 1);
        assert_eq!(overflow(5, 5, 10), 0);
        assert_eq!(overflow(0, 3, 10), 0);
        assert_eq!(overflow(u64::MAX, 1, 10), u64::MAX - 10);
    }
}
