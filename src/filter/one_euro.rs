//! One Euro Filter - adaptive low-pass filter for jitter reduction
//!
//! Smooth when slow (reduces jitter), responsive when fast (tracks flicks).
//!
//! ```text
//! dx_hat = ema(dx / dt, d_cutoff)
//! cutoff = min_cutoff + beta * |dx_hat|
//! alpha  = dt / (dt + 1 / (2π · cutoff))
//! out    = alpha * x + (1 - alpha) * out_prev
//! ```
//!
//! Timestamps are milliseconds; cutoffs are Hz, so `dt` is converted to
//! seconds internally.

use std::f64::consts::PI;

use super::ScalarFilter;

/// Floor for non-positive or zero time steps (seconds)
const MIN_DT_SECS: f64 = 1e-6;

/// Adaptive low-pass filter: smooth at rest, responsive during motion
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    /// Minimum cutoff frequency (Hz) - lower = smoother at rest
    min_cutoff: f64,
    /// Speed coefficient - higher = less lag during fast motion
    beta: f64,
    /// Derivative cutoff frequency (Hz)
    d_cutoff: f64,

    x_prev: f64,
    dx_prev: f64,
    t_prev: f64,
    initialized: bool,
}

impl OneEuroFilter {
    /// Create a filter with the given cutoffs
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            x_prev: 0.0,
            dx_prev: 0.0,
            t_prev: 0.0,
            initialized: false,
        }
    }

    /// Blend factor for a cutoff frequency and time step
    fn smoothing_factor(dt: f64, cutoff: f64) -> f64 {
        let tau = 1.0 / (2.0 * PI * cutoff.max(f64::MIN_POSITIVE));
        dt / (dt + tau)
    }
}

impl ScalarFilter for OneEuroFilter {
    fn filter(&mut self, value: f64, timestamp_ms: f64) -> f64 {
        if !self.initialized {
            self.x_prev = value;
            self.dx_prev = 0.0;
            self.t_prev = timestamp_ms;
            self.initialized = true;
            return value;
        }

        let mut dt = (timestamp_ms - self.t_prev) / 1000.0;
        if dt <= 0.0 || dt.is_nan() {
            dt = MIN_DT_SECS;
        }

        // 1. Estimate derivative
        let a_d = Self::smoothing_factor(dt, self.d_cutoff);
        let dx = (value - self.x_prev) / dt;
        let dx_hat = a_d * dx + (1.0 - a_d) * self.dx_prev;
        if !dx_hat.is_finite() {
            // Jump too large to differentiate: snap to the new value
            self.x_prev = value;
            self.dx_prev = 0.0;
            self.t_prev = timestamp_ms.max(self.t_prev);
            return value;
        }

        // 2. Adaptive cutoff
        let cutoff = self.min_cutoff + self.beta * dx_hat.abs();
        let a = Self::smoothing_factor(dt, cutoff);

        // 3. Blend
        let x_hat = self.x_prev + a * (value - self.x_prev);

        self.x_prev = x_hat;
        self.dx_prev = dx_hat;
        if timestamp_ms > self.t_prev {
            self.t_prev = timestamp_ms;
        }

        x_hat
    }

    fn reset(&mut self) {
        self.initialized = false;
    }
}
