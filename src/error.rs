//! Error types for Sluice limiters.

use thiserror::Error;

/// Main error type for Sluice operations.
///
/// Every variant is a local, recoverable condition: a limiter stays usable
/// after returning any of them.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Invalid construction parameters or an unparseable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The token bucket cannot cover the requested weight right now
    #[error("Insufficient tokens: requested {requested}, available {available:.3}")]
    CapacityExceeded { requested: u64, available: f64 },

    /// The paced queue is at capacity
    #[error("Queue is full")]
    QueueFull,

    /// The synchronous sliding window would exceed its capacity
    #[error("Sliding window is full")]
    WindowFull,

    /// The asynchronous sliding window was used after `stop`
    #[error("Sliding window has stopped")]
    WindowStopped,

    /// A background-task limiter was started outside a Tokio runtime
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Sluice operations.
pub type Result<T> = std::result::Result<T, SluiceError>;
