//! Motion estimation
//!
//! Smoothed speed and sample-interval tracking from the raw stream, used to
//! size the lookahead. Both are exponential moving averages:
//!
//! ```text
//! speed_smooth    = α * |Δp| / Δt + (1 - α) * speed_smooth
//! interval_smooth = β * Δt        + (1 - β) * interval_smooth
//! ```

use tracing::trace;

use crate::sample::{distance, Sample};

/// Speed smoothing factor (higher = more responsive)
const SPEED_SMOOTHING: f64 = 0.4;

/// Interval smoothing factor
const INTERVAL_SMOOTHING: f64 = 0.1;

/// Gaps longer than this (ms) are treated as a pause, not motion
const MAX_MOTION_GAP_MS: f64 = 200.0;

/// Interval assumed before two samples have been seen (ms, ~125 Hz)
const DEFAULT_INTERVAL_MS: f64 = 8.0;

/// Smoothed speed and sampling interval of the raw stream
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    /// Smoothed speed (units per ms)
    speed: f64,
    /// Smoothed inter-sample gap (ms)
    mean_interval: f64,
    /// Previous raw sample
    last: Option<Sample>,
    /// Whether `mean_interval` has been seeded by a real gap
    interval_seeded: bool,
}

impl MotionEstimator {
    /// Create an estimator with no history
    pub fn new() -> Self {
        Self {
            speed: 0.0,
            mean_interval: DEFAULT_INTERVAL_MS,
            last: None,
            interval_seeded: false,
        }
    }

    /// Feed one raw sample
    pub fn update(&mut self, sample: &Sample) {
        if let Some(prev) = self.last {
            let dt = sample.timestamp - prev.timestamp;
            if dt > 0.0 && dt < MAX_MOTION_GAP_MS {
                let v = distance(prev.position, sample.position) / dt;
                if !v.is_finite() {
                    trace!("Motion jump out of range; restarting estimate");
                    self.reset();
                    self.last = Some(*sample);
                    return;
                }
                self.speed = SPEED_SMOOTHING * v + (1.0 - SPEED_SMOOTHING) * self.speed;

                if self.interval_seeded {
                    self.mean_interval =
                        INTERVAL_SMOOTHING * dt + (1.0 - INTERVAL_SMOOTHING) * self.mean_interval;
                } else {
                    self.mean_interval = dt;
                    self.interval_seeded = true;
                }
            } else if dt >= MAX_MOTION_GAP_MS {
                // Pause: motion restarts from rest
                self.speed = 0.0;
            }

            trace!(
                "Motion update: dt={:.2}ms speed={:.3}/ms interval={:.2}ms",
                dt,
                self.speed,
                self.mean_interval
            );
        }
        self.last = Some(*sample);
    }

    /// Smoothed speed in units per millisecond
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Smoothed sampling interval in milliseconds
    pub fn mean_interval(&self) -> f64 {
        self.mean_interval
    }

    /// Reset to the no-history state
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for MotionEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stationary_has_zero_speed() {
        let mut m = MotionEstimator::new();
        for i in 0..10 {
            m.update(&Sample::new((100.0, 100.0), i as f64 * 8.0));
        }
        assert_eq!(m.speed(), 0.0);
        assert_eq!(m.mean_interval(), 8.0);
    }

    #[test]
    fn test_constant_velocity_converges() {
        let mut m = MotionEstimator::new();
        for i in 0..40 {
            // 2 units per ms along x
            m.update(&Sample::new((i as f64 * 8.0, 0.0), i as f64 * 4.0));
        }
        assert!((m.speed() - 2.0).abs() < 1e-3, "speed {}", m.speed());
        assert!((m.mean_interval() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_pause_resets_speed() {
        let mut m = MotionEstimator::new();
        m.update(&Sample::new((0.0, 0.0), 0.0));
        m.update(&Sample::new((10.0, 0.0), 5.0));
        assert!(m.speed() > 0.0);
        m.update(&Sample::new((11.0, 0.0), 1000.0));
        assert_eq!(m.speed(), 0.0);
    }

    #[test]
    fn test_out_of_order_ignored() {
        let mut m = MotionEstimator::new();
        m.update(&Sample::new((0.0, 0.0), 10.0));
        m.update(&Sample::new((10.0, 0.0), 5.0));
        assert_eq!(m.speed(), 0.0);
        assert_eq!(m.mean_interval(), DEFAULT_INTERVAL_MS);
    }

    #[test]
    fn test_overflowing_jump_restarts_estimate() {
        let mut m = MotionEstimator::new();
        m.update(&Sample::new((-1e308, 0.0), 0.0));
        m.update(&Sample::new((1e308, 0.0), 8.0));
        assert_eq!(m.speed(), 0.0);
        assert_eq!(m.mean_interval(), DEFAULT_INTERVAL_MS);

        m.update(&Sample::new((9e307, 0.0), 16.0));
        assert!(m.speed().is_finite() && m.speed() > 0.0);
    }
}
