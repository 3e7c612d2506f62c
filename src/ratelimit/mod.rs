//! Rate limiting algorithms.

mod backend;
mod leaky_bucket;
mod paced;
mod sliding;
mod sync_window;
mod token_bucket;
mod window;

pub use backend::{Decision, Limiter};
pub use leaky_bucket::{AddOutcome, DecayingLeakyBucket};
pub use paced::PacedQueueBucket;
pub use sliding::AsyncSlidingWindow;
pub use sync_window::SyncSlidingWindow;
pub use token_bucket::TokenBucket;
pub use window::{weighted_estimate, Window, WindowPair};

use crate::config::LimiterSpec;
use crate::error::{Result, SluiceError};

/// Build a weight-based limiter from its configuration.
///
/// Paced queues carry items rather than weights and are built directly with
/// [`PacedQueueBucket::new`]. A sliding window spawns its rotation task, so
/// this must run inside a Tokio runtime for that kind.
pub fn build_limiter(spec: &LimiterSpec) -> Result<Box<dyn Limiter>> {
    match spec {
        LimiterSpec::TokenBucket(config) => Ok(Box::new(TokenBucket::new(config.clone())?)),
        LimiterSpec::LeakyBucket(config) => {
            Ok(Box::new(DecayingLeakyBucket::new(config.clone())?))
        }
        LimiterSpec::SlidingWindow(config) => {
            Ok(Box::new(AsyncSlidingWindow::new(config.clone())?))
        }
        LimiterSpec::SyncSlidingWindow(config) => {
            Ok(Box::new(SyncSlidingWindow::new(config.clone())?))
        }
        LimiterSpec::PacedQueue(_) => Err(SluiceError::Config(
            "paced queues are item based and cannot be driven by weight".into(),
        )),
    }
}
