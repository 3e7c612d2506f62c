//! Sluice - Rate Limiting Admission Control
//!
//! This crate decides, request by request, whether a weighted unit of work
//! may proceed so that traffic stays under a configured budget. It provides
//! a token bucket, a decaying leaky bucket, a paced queue that releases items
//! at a fixed cadence, and two sliding window counters (one rotated by a
//! background task, one rotated lazily on each call).

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
