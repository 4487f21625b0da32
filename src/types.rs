//! Core data types for the chunk encoding layer
//!
//! - `Sample`: a single (timestamp, value) reading
//! - `Interval`: a closed time interval for range queries
//!
//! Timestamps are Unix milliseconds throughout, matching the rest of the
//! engine.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds. Totally ordered; chunks require strictly
/// increasing timestamps in insertion order.
pub type Timestamp = i64;

/// A single time-series sample pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: Timestamp,
    /// The measured value
    pub value: f64,
}

/// The defined zero pair a fresh iterator reports before the first
/// `scan`/`find_at_or_after`.
pub const ZERO_SAMPLE: Sample = Sample {
    timestamp: 0,
    value: 0.0,
};

impl Sample {
    /// Create a sample at a specific timestamp
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Create a sample stamped with the current wall-clock time
    pub fn now(value: f64) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            value,
        }
    }
}

/// A closed time interval: both endpoints are inclusive.
///
/// Note this differs from the engine's half-open query ranges; chunk-level
/// range extraction deliberately includes samples at both boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// Oldest timestamp (inclusive), in milliseconds
    pub oldest: Timestamp,
    /// Newest timestamp (inclusive), in milliseconds
    pub newest: Timestamp,
}

impl Interval {
    /// Create a new closed interval
    pub fn new(oldest: Timestamp, newest: Timestamp) -> Self {
        Self { oldest, newest }
    }

    /// Check if a timestamp falls within this interval (boundaries included)
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.oldest && timestamp <= self.newest
    }
}
