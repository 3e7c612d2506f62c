//! Token bucket: a fixed capacity of tokens refilled continuously.

use parking_lot::Mutex;
use std::time::Instant;
use tracing::{debug, trace};

use super::backend::{Decision, Limiter};
use crate::clock::{Clock, SystemClock};
use crate::config::TokenBucketConfig;
use crate::error::{Result, SluiceError};

#[derive(Debug)]
struct BucketState {
    current: f64,
    last_refill: Instant,
}

/// A token bucket guarded by a single lock.
///
/// Refill, check and debit happen under one lock acquisition, so concurrent
/// callers never observe a half-applied take. The bucket starts full.
#[derive(Debug)]
pub struct TokenBucket<C: Clock = SystemClock> {
    capacity: f64,
    refill_rate_per_second: f64,
    state: Mutex<BucketState>,
    clock: C,
}

impl TokenBucket<SystemClock> {
    /// Create a token bucket driven by the system clock.
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> TokenBucket<C> {
    /// Create a token bucket with an explicit clock.
    pub fn with_clock(config: TokenBucketConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let now = clock.now();

        Ok(Self {
            capacity: config.capacity,
            refill_rate_per_second: config.refill_rate_per_second,
            state: Mutex::new(BucketState {
                current: config.capacity,
                last_refill: now,
            }),
            clock,
        })
    }

    /// Take `n` tokens, or fail with `CapacityExceeded` leaving the
    /// (refilled) level untouched.
    pub fn take_n(&self, n: u64) -> Result<()> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        self.refill(&mut state, now);

        let requested = n as f64;
        if state.current - requested < 0.0 {
            debug!(
                requested = n,
                available = state.current,
                "Token bucket has insufficient tokens"
            );
            return Err(SluiceError::CapacityExceeded {
                requested: n,
                available: state.current,
            });
        }

        state.current -= requested;
        trace!(taken = n, remaining = state.current, "Tokens taken");
        Ok(())
    }

    /// Tokens that would be available right now, without mutating the bucket.
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        let now = self.clock.now();
        self.refilled_level(&state, now)
    }

    fn refilled_level(&self, state: &BucketState, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refill_amount = elapsed.as_secs_f64() * self.refill_rate_per_second;
        (state.current + refill_amount).min(self.capacity)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        state.current = self.refilled_level(state, now);
        state.last_refill = now;
    }
}

impl<C: Clock> Limiter for TokenBucket<C> {
    fn admit(&mut self, weight: u64) -> Result<Decision> {
        match self.take_n(weight) {
            Ok(()) => Ok(Decision::allowed(weight)),
            Err(SluiceError::CapacityExceeded {
                requested,
                available,
            }) => {
                let spillover = (requested as f64 - available).ceil().max(0.0) as u64;
                Ok(Decision::rejected(weight, spillover))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn bucket(capacity: f64, rate: f64) -> (TokenBucket<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let bucket =
            TokenBucket::with_clock(TokenBucketConfig::new(capacity, rate), clock.clone()).unwrap();
        (bucket, clock)
    }

    #[test]
    fn test_take_less_than_capacity() {
        let (bucket, _clock) = bucket(10.0, 1.0);

        assert_ok!(bucket.take_n(5));
        assert_eq!(bucket.available(), 5.0);
    }

    #[test]
    fn test_take_more_than_capacity_fails() {
        let (bucket, _clock) = bucket(10.0, 0.1);

        let err = assert_err!(bucket.take_n(11));
        match err {
            SluiceError::CapacityExceeded {
                requested,
                available,
            } => {
                assert_eq!(requested, 11);
                assert_eq!(available, 10.0);
            }
            other => panic!("Expected CapacityExceeded, got: {:?}", other),
        }
        // A failed take leaves the bucket untouched
        assert_eq!(bucket.available(), 10.0);
    }

    #[test]
    fn test_refill_after_one_second() {
        let (bucket, clock) = bucket(10.0, 1.0);

        assert_err!(bucket.take_n(11));

        clock.advance(Duration::from_secs(1));
        assert_ok!(bucket.take_n(1));
        assert_eq!(bucket.available(), 9.0);
    }

    #[test]
    fn test_full_refill_allows_taking_capacity_again() {
        let (bucket, clock) = bucket(10.0, 10.0);

        assert_ok!(bucket.take_n(10));
        clock.advance(Duration::from_secs(1));
        assert_ok!(bucket.take_n(10));
    }

    #[test]
    fn test_slower_refill_rejects_second_full_take() {
        let (bucket, clock) = bucket(10.0, 8.0);

        assert_ok!(bucket.take_n(10));
        clock.advance(Duration::from_secs(1));
        assert_err!(bucket.take_n(10));

        // The refill applied by the failed call is kept
        assert_eq!(bucket.available(), 8.0);
    }

    #[test]
    fn test_fractional_rate_accumulates() {
        let (bucket, clock) = bucket(5.0, 0.5);

        assert_ok!(bucket.take_n(5));
        for _ in 0..4 {
            clock.advance(Duration::from_millis(500));
            assert_err!(bucket.take_n(2));
        }
        // 2s at 0.5 tokens/s is one token; four calls must not lose precision
        assert!((bucket.available() - 1.0).abs() < 1e-9);

        clock.advance(Duration::from_secs(2));
        assert_ok!(bucket.take_n(2));
    }

    #[test]
    fn test_level_never_exceeds_capacity() {
        let (bucket, clock) = bucket(3.0, 100.0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(bucket.available(), 3.0);
        assert_ok!(bucket.take_n(3));
        assert_eq!(bucket.available(), 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = TokenBucket::new(TokenBucketConfig::new(0.0, 1.0));
        assert!(matches!(result, Err(SluiceError::Config(_))));
    }

    #[test]
    fn test_admit_reports_spillover() {
        let (mut bucket, _clock) = bucket(10.0, 1.0);

        let decision = bucket.admit(7).unwrap();
        assert_eq!(decision, Decision::allowed(7));

        let decision = bucket.admit(5).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.spillover, 2);
    }

    #[test]
    fn test_concurrent_takes_never_overdraw() {
        let clock = ManualClock::new();
        let bucket = Arc::new(
            TokenBucket::with_clock(TokenBucketConfig::new(100.0, 1.0), clock).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                std::thread::spawn(move || (0..50).filter(|_| bucket.take_n(1).is_ok()).count())
            })
            .collect();

        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken, 100);
        assert_eq!(bucket.available(), 0.0);
    }
}
