//! Recorded sample history.
//!
//! Contains the timestamped, append-only series a recording session produces.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Display;

/// A single recorded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample<T> {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,

    /// Sampled value.
    pub value: T,
}

impl<T> Sample<T> {
    /// Create a sample.
    pub fn new(timestamp: DateTime<Utc>, value: T) -> Self {
        Self { timestamp, value }
    }
}

/// Samples appended once per sampling tick while measuring.
///
/// The number of samples is the number of recorded seconds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SampleLog<T> {
    samples: Vec<Sample<T>>,
}

impl<T> Default for SampleLog<T> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
        }
    }
}

impl<T> SampleLog<T> {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample.
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: T) {
        self.samples.push(Sample::new(timestamp, value));
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in recording order.
    pub fn samples(&self) -> &[Sample<T>] {
        &self.samples
    }

    /// Iterate over sampled values.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.samples.iter().map(|s| &s.value)
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<&Sample<T>> {
        self.samples.last()
    }

    /// Remove all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl<T: Display> SampleLog<T> {
    /// Export as CSV with a `timestamp,value` header. Timestamps are RFC 3339.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("timestamp,value\n");
        for sample in &self.samples {
            csv.push_str(&format!(
                "{},{}\n",
                sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                sample.value
            ));
        }
        csv
    }
}
