//! Decaying leaky bucket: a level that drains continuously and reports overflow.

use std::time::Instant;
use tracing::{debug, trace};

use super::backend::{Decision, Limiter};
use crate::clock::{Clock, SystemClock};
use crate::config::LeakyBucketConfig;
use crate::error::Result;

/// Result of adding weight to a [`DecayingLeakyBucket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// Whether the whole weight fit under capacity
    pub accepted: bool,
    /// Weight that did not fit (0 when accepted)
    pub spillover: u64,
}

/// A counter that leaks at a fixed rate.
///
/// Leaking is computed lazily on read; there is no background task. The
/// bucket is not internally locked: mutation takes `&mut self`, so sharing
/// one across threads requires an external lock.
///
/// On overflow the level is still raised to capacity. The overflow is
/// reported as spillover instead of being dropped silently.
#[derive(Debug)]
pub struct DecayingLeakyBucket<C: Clock = SystemClock> {
    capacity: u64,
    current: u64,
    leak_rate_per_second: f64,
    last_updated: Instant,
    clock: C,
}

impl DecayingLeakyBucket<SystemClock> {
    pub fn new(config: LeakyBucketConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> DecayingLeakyBucket<C> {
    pub fn with_clock(config: LeakyBucketConfig, clock: C) -> Result<Self> {
        config.validate()?;
        let now = clock.now();

        Ok(Self {
            capacity: config.capacity,
            current: 0,
            leak_rate_per_second: config.leak_rate_per_second,
            last_updated: now,
            clock,
        })
    }

    /// Current level after leaking. Never negative, no side effects.
    pub fn count(&self) -> u64 {
        self.level_at(self.clock.now())
    }

    /// Add `n` to the bucket.
    ///
    /// When the leaked level plus `n` exceeds capacity the call is rejected
    /// with the excess as spillover, and the level is raised to capacity.
    pub fn add_n(&mut self, n: u64) -> AddOutcome {
        let now = self.clock.now();
        let count = self.level_at(now);
        let wanted = count.saturating_add(n);

        let outcome = if wanted > self.capacity {
            let spillover = wanted - self.capacity;
            debug!(
                level = count,
                added = n,
                capacity = self.capacity,
                spillover,
                "Leaky bucket overflowed"
            );
            AddOutcome {
                accepted: false,
                spillover,
            }
        } else {
            AddOutcome {
                accepted: true,
                spillover: 0,
            }
        };

        self.current = wanted.min(self.capacity);
        self.last_updated = now;
        trace!(level = self.current, "Leaky bucket updated");
        outcome
    }

    fn level_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.last_updated);
        let leaked = (elapsed.as_secs_f64() * self.leak_rate_per_second).floor();
        // Float-to-int casts saturate, so a huge leak simply empties the bucket
        self.current.saturating_sub(leaked as u64)
    }
}

impl<C: Clock> Limiter for DecayingLeakyBucket<C> {
    fn admit(&mut self, weight: u64) -> Result<Decision> {
        let outcome = self.add_n(weight);
        if outcome.accepted {
            Ok(Decision::allowed(weight))
        } else {
            Ok(Decision::rejected(weight, outcome.spillover))
        }
    }
}
