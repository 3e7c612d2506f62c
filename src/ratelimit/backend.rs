//! Limiter trait for driving any weight-based limiter through one interface.

use crate::error::Result;

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the weight was admitted
    pub allowed: bool,
    /// The weight that was checked
    pub weight: u64,
    /// Portion of the weight that did not fit (0 when allowed)
    pub spillover: u64,
}

impl Decision {
    pub fn allowed(weight: u64) -> Self {
        Self {
            allowed: true,
            weight,
            spillover: 0,
        }
    }

    pub fn rejected(weight: u64, spillover: u64) -> Self {
        Self {
            allowed: false,
            weight,
            spillover,
        }
    }
}

/// Trait for weight-based limiter implementations.
///
/// Capacity rejections are reported as `Ok(Decision { allowed: false, .. })`;
/// `Err` is reserved for conditions that make the limiter unusable for the
/// call, such as a stopped sliding window.
pub trait Limiter: Send {
    /// Check whether `weight` may be admitted right now, recording it if so.
    fn admit(&mut self, weight: u64) -> Result<Decision>;

    /// Release any background resources. Idempotent.
    fn shutdown(&mut self) {}
}
