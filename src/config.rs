//! Configuration management for Sluice.
//!
//! Each limiter is parameterized once, at construction, from one of the config
//! structs below. A [`SluiceConfig`] file names a set of limiters so the
//! `sluice` binary can pick one to drive.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SluiceError};

/// Time unit for window lengths (matches the usual per-second/minute/hour/day format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Configuration for a token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens the bucket holds
    pub capacity: f64,
    /// Tokens added back per second
    pub refill_rate_per_second: f64,
}

impl TokenBucketConfig {
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
        }
    }

    /// Builder-style: set capacity
    pub fn capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder-style: set refill rate
    pub fn refill_rate(mut self, refill_rate_per_second: f64) -> Self {
        self.refill_rate_per_second = refill_rate_per_second;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(SluiceError::Config(
                "token bucket capacity must be a positive number".into(),
            ));
        }
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second <= 0.0 {
            return Err(SluiceError::Config(
                "token bucket refill rate must be a positive number".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a decaying leaky bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakyBucketConfig {
    /// Maximum level of the bucket
    pub capacity: u64,
    /// Units drained per second
    pub leak_rate_per_second: f64,
}

impl LeakyBucketConfig {
    pub fn new(capacity: u64, leak_rate_per_second: f64) -> Self {
        Self {
            capacity,
            leak_rate_per_second,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SluiceError::Config(
                "leaky bucket capacity must be positive".into(),
            ));
        }
        if !self.leak_rate_per_second.is_finite() || self.leak_rate_per_second <= 0.0 {
            return Err(SluiceError::Config(
                "leaky bucket leak rate must be a positive number".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a paced queue bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacedQueueConfig {
    /// Maximum number of queued items
    pub capacity: usize,
    /// Items released to the sink per second
    pub rate_per_second: u32,
    /// How long the pacer sleeps when it finds the queue empty
    #[serde(
        rename = "poll_interval_ms",
        default = "default_poll_interval",
        with = "duration_ms"
    )]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

impl PacedQueueConfig {
    pub fn new(capacity: usize, rate_per_second: u32) -> Self {
        Self {
            capacity,
            rate_per_second,
            poll_interval: default_poll_interval(),
        }
    }

    /// Builder-style: set the empty-queue poll interval
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spacing between two releases: one second divided by the rate.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.rate_per_second.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SluiceError::Config(
                "paced queue capacity must be positive".into(),
            ));
        }
        if self.rate_per_second == 0 {
            return Err(SluiceError::Config(
                "paced queue rate must be positive".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SluiceError::Config(
                "paced queue poll interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration shared by both sliding window variants.
///
/// The window length comes from `interval` (`interval_ms` in YAML) when set,
/// otherwise from `unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Maximum weighted count per window
    pub capacity: u64,
    /// Window length as a named unit
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Exact window length
    #[serde(rename = "interval_ms", default, with = "duration_ms::option")]
    pub interval: Option<Duration>,
}

impl SlidingWindowConfig {
    pub fn new(capacity: u64, interval: Duration) -> Self {
        Self {
            capacity,
            unit: None,
            interval: Some(interval),
        }
    }

    pub fn with_unit(capacity: u64, unit: TimeUnit) -> Self {
        Self {
            capacity,
            unit: Some(unit),
            interval: None,
        }
    }

    /// Resolve the window length.
    pub fn interval(&self) -> Result<Duration> {
        let interval = match (self.interval, self.unit) {
            (Some(interval), _) => interval,
            (None, Some(unit)) => unit.duration(),
            (None, None) => {
                return Err(SluiceError::Config(
                    "sliding window needs either interval_ms or unit".into(),
                ))
            }
        };
        if interval.is_zero() {
            return Err(SluiceError::Config(
                "sliding window interval must be positive".into(),
            ));
        }
        Ok(interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SluiceError::Config(
                "sliding window capacity must be positive".into(),
            ));
        }
        self.interval()?;
        Ok(())
    }
}

/// Durations written as (possibly fractional) milliseconds.
mod duration_ms {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        match u64::try_from(value.as_nanos()) {
            Ok(nanos) if nanos % 1_000_000 == 0 => serializer.serialize_u64(nanos / 1_000_000),
            _ => serializer.serialize_f64(value.as_secs_f64() * 1000.0),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(ms / 1000.0)
            .map_err(|e| D::Error::custom(format!("invalid millisecond duration {}: {}", ms, e)))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            #[derive(Deserialize)]
            struct Millis(#[serde(with = "super")] Duration);

            let millis: Option<Millis> = Option::deserialize(deserializer)?;
            Ok(millis.map(|Millis(duration)| duration))
        }
    }
}

/// The limiter algorithm and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterSpec {
    TokenBucket(TokenBucketConfig),
    LeakyBucket(LeakyBucketConfig),
    PacedQueue(PacedQueueConfig),
    SlidingWindow(SlidingWindowConfig),
    SyncSlidingWindow(SlidingWindowConfig),
}

impl LimiterSpec {
    pub fn validate(&self) -> Result<()> {
        match self {
            LimiterSpec::TokenBucket(c) => c.validate(),
            LimiterSpec::LeakyBucket(c) => c.validate(),
            LimiterSpec::PacedQueue(c) => c.validate(),
            LimiterSpec::SlidingWindow(c) | LimiterSpec::SyncSlidingWindow(c) => c.validate(),
        }
    }

    /// Short name of the algorithm, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            LimiterSpec::TokenBucket(_) => "token_bucket",
            LimiterSpec::LeakyBucket(_) => "leaky_bucket",
            LimiterSpec::PacedQueue(_) => "paced_queue",
            LimiterSpec::SlidingWindow(_) => "sliding_window",
            LimiterSpec::SyncSlidingWindow(_) => "sync_sliding_window",
        }
    }
}

/// A named limiter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterEntry {
    pub name: String,
    #[serde(flatten)]
    pub spec: LimiterSpec,
}

/// Main configuration: the set of limiters a process can build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SluiceConfig {
    #[serde(default)]
    pub limiters: Vec<LimiterEntry>,
}

impl Default for SluiceConfig {
    fn default() -> Self {
        Self {
            limiters: vec![LimiterEntry {
                name: "default".to_string(),
                spec: LimiterSpec::TokenBucket(TokenBucketConfig::new(10.0, 1.0)),
            }],
        }
    }
}

impl SluiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SluiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SluiceError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every entry and reject empty or duplicate names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.limiters {
            if entry.name.is_empty() {
                return Err(SluiceError::Config("limiter name must not be empty".into()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(SluiceError::Config(format!(
                    "duplicate limiter name: {}",
                    entry.name
                )));
            }
            entry.spec.validate().map_err(|e| match e {
                SluiceError::Config(msg) => SluiceError::Config(format!("{}: {}", entry.name, msg)),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Find a limiter entry by name.
    pub fn find(&self, name: &str) -> Option<&LimiterEntry> {
        self.limiters.iter().find(|entry| entry.name == name)
    }
}
