//! Latency-budget smoother
//!
//! Plain time-aware EMA whose blend factor comes straight from a target
//! smoothing latency: `alpha = dt / (dt + latency_ms)`. Stalls and clock
//! glitches (`dt` outside `(0, 100ms]`) are treated as a 1 ms step.

use super::ScalarFilter;

/// Largest time step accepted as-is (ms)
const MAX_DT_MS: f64 = 100.0;

/// Substitute time step for out-of-range gaps (ms)
const FALLBACK_DT_MS: f64 = 1.0;

/// Exponential smoother parameterised by latency budget
#[derive(Debug, Clone)]
pub struct LatencyFilter {
    latency_ms: f64,
    last_output: f64,
    last_timestamp: f64,
    initialized: bool,
}

impl LatencyFilter {
    /// Create a smoother with the given latency budget in milliseconds
    pub fn new(latency_ms: f64) -> Self {
        Self {
            latency_ms: latency_ms.max(0.0),
            last_output: 0.0,
            last_timestamp: 0.0,
            initialized: false,
        }
    }
}

impl ScalarFilter for LatencyFilter {
    fn filter(&mut self, value: f64, timestamp_ms: f64) -> f64 {
        if !self.initialized {
            self.last_output = value;
            self.last_timestamp = timestamp_ms;
            self.initialized = true;
            return value;
        }

        let mut dt = timestamp_ms - self.last_timestamp;
        if !(dt > 0.0 && dt <= MAX_DT_MS) {
            dt = FALLBACK_DT_MS;
        }

        let alpha = dt / (dt + self.latency_ms);
        self.last_output += alpha * (value - self.last_output);
        self.last_timestamp = timestamp_ms;
        self.last_output
    }

    fn reset(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_factor() {
        let mut f = LatencyFilter::new(4.0);
        f.filter(0.0, 0.0);
        // dt = 4ms -> alpha = 0.5
        assert!((f.filter(10.0, 4.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_stall_treated_as_one_ms() {
        let mut f = LatencyFilter::new(4.0);
        f.filter(0.0, 0.0);
        // dt = 500ms -> treated as 1ms -> alpha = 0.2
        assert!((f.filter(10.0, 500.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_latency_passes_through() {
        let mut f = LatencyFilter::new(0.0);
        f.filter(0.0, 0.0);
        assert_eq!(f.filter(3.0, 8.0), 3.0);
        // Same timestamp still finite
        assert_eq!(f.filter(4.0, 8.0), 4.0);
    }

    #[test]
    fn test_constant_input_is_idempotent() {
        let mut f = LatencyFilter::new(8.0);
        for i in 0..20 {
            assert_eq!(f.filter(-3.0, i as f64 * 2.0), -3.0);
        }
    }
}
