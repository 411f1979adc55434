//! Bounded FIFO of per-session buffer-ratio samples.
//!
//! The window keeps at most `capacity` samples; pushing past that evicts the
//! oldest one, so "last N sessions" holds structurally rather than by
//! convention. It serializes as a plain array, oldest sample first, which is the
//! persisted `bufferRatioWindow` layout.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Fixed-capacity ring of buffer-ratio samples.
///
/// Equality compares samples only; capacity is re-applied by the classifier
/// when a persisted window is adopted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    /// Creates an empty window. A zero capacity is bumped to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a sample and returns the evicted one, if the window was full.
    pub fn push(&mut self, sample: f64) -> Option<f64> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Changes the capacity, dropping the oldest samples if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Up to `count` of the most recent samples, newest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().rev().take(count).copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

impl PartialEq for SampleWindow {
    fn eq(&self, other: &Self) -> bool {
        self.samples == other.samples
    }
}

impl From<Vec<f64>> for SampleWindow {
    fn from(samples: Vec<f64>) -> Self {
        let capacity = samples.len().max(1);
        Self {
            samples: samples.into(),
            capacity,
        }
    }
}

impl From<SampleWindow> for Vec<f64> {
    fn from(window: SampleWindow) -> Self {
        window.samples.into()
    }
}
