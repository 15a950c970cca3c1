//! Timestamped position samples
//!
//! Positions are plain `(x, y)` tuples in host units (pixels for a cursor).
//! Timestamps are host-supplied milliseconds; only differences between them
//! are ever used.

use serde::{Deserialize, Serialize};

/// 2D position in host units
pub type Position = (f64, f64);

/// One timestamped position reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in host units
    pub position: Position,
    /// Timestamp in milliseconds
    pub timestamp: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(position: Position, timestamp: f64) -> Self {
        Self {
            position,
            timestamp,
        }
    }

    /// True when both coordinates and the timestamp are finite
    pub fn is_finite(&self) -> bool {
        self.position.0.is_finite() && self.position.1.is_finite() && self.timestamp.is_finite()
    }

    /// Position difference `self - earlier`
    pub fn delta_from(&self, earlier: &Sample) -> Position {
        (
            self.position.0 - earlier.position.0,
            self.position.1 - earlier.position.1,
        )
    }

    /// Sample on the straight line between `self` and `other` at `fraction`
    ///
    /// Both the position and the timestamp are interpolated.
    pub fn lerp(&self, other: &Sample, fraction: f64) -> Sample {
        Sample {
            position: lerp_position(self.position, other.position, fraction),
            timestamp: self.timestamp + (other.timestamp - self.timestamp) * fraction,
        }
    }
}

/// Sample produced by the predictor rather than the input device
///
/// Never enters the raw window. The engine keeps at most one of these, and
/// drops it as soon as a raw sample arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedSample(Sample);

impl PredictedSample {
    /// Tag a sample as synthetic
    pub fn new(sample: Sample) -> Self {
        Self(sample)
    }

    /// Underlying sample
    pub fn sample(&self) -> &Sample {
        &self.0
    }
}

/// Euclidean distance between two positions
pub fn distance(a: Position, b: Position) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

/// Linear interpolation between two positions
pub fn lerp_position(from: Position, to: Position, fraction: f64) -> Position {
    (
        from.0 + (to.0 - from.0) * fraction,
        from.1 + (to.1 - from.1) * fraction,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_and_distance() {
        let a = Sample::new((1.0, 2.0), 0.0);
        let b = Sample::new((4.0, 6.0), 8.0);
        assert_eq!(b.delta_from(&a), (3.0, 4.0));
        assert_eq!(distance(a.position, b.position), 5.0);
    }

    #[test]
    fn test_lerp_interpolates_time() {
        let a = Sample::new((0.0, 0.0), 10.0);
        let b = Sample::new((10.0, -10.0), 20.0);
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid.position, (5.0, -5.0));
        assert_eq!(mid.timestamp, 15.0);
    }

    #[test]
    fn test_is_finite() {
        assert!(Sample::new((1.0, 1.0), 1.0).is_finite());
        assert!(!Sample::new((f64::NAN, 1.0), 1.0).is_finite());
        assert!(!Sample::new((1.0, 1.0), f64::INFINITY).is_finite());
    }
}
