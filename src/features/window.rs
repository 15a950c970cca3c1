//! Fixed-capacity FIFO of raw samples

use std::collections::VecDeque;

use crate::sample::Sample;

/// Ordered history of the most recent raw samples
///
/// Holds at most `capacity` samples; pushing into a full window evicts the
/// oldest one.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SlidingWindow {
    /// Create an empty window
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, returning the evicted one if the window was full
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Maximum number of samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample has been pushed
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True when the window holds `capacity` samples
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Newest sample
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The newest `n` samples, oldest first (fewer if the window is shorter)
    pub fn tail(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Change capacity, dropping the oldest samples if it shrinks
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    /// Remove all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
