//! Chatter Suppressor
//!
//! Distance-gated hysteresis for micro-jitter. Movements shorter than
//! `strength` only nudge the output toward the input; anything at or beyond
//! it is treated as intentional and passed through.
//!
//! ```text
//! d < strength:  out = lerp(out, in, clamp(d / strength * latency_factor, 0, 1))
//! d >= strength: out = in
//! ```

use tracing::trace;

use crate::sample::{distance, lerp_position, Position};

/// Chatter suppressor state
#[derive(Debug, Clone)]
pub struct ChatterSuppressor {
    /// Distance below which movement counts as chatter
    strength: f64,
    /// Scales how quickly sub-threshold drift is followed
    latency_factor: f64,
    /// Last accepted output
    last_output: Option<Position>,
}

impl ChatterSuppressor {
    /// Create a suppressor. `strength <= 0` disables it.
    pub fn new(strength: f64, latency_factor: f64) -> Self {
        Self {
            strength,
            latency_factor,
            last_output: None,
        }
    }

    /// Filter one position
    pub fn filter(&mut self, position: Position) -> Position {
        let Some(last) = self.last_output else {
            self.last_output = Some(position);
            return position;
        };

        if self.strength <= 0.0 {
            self.last_output = Some(position);
            return position;
        }

        let d = distance(last, position);
        let output = if d >= self.strength {
            position
        } else {
            let alpha = ((d / self.strength) * self.latency_factor).clamp(0.0, 1.0);
            trace!("Chatter: d={:.3} alpha={:.3}", d, alpha);
            lerp_position(last, position, alpha)
        };

        self.last_output = Some(output);
        output
    }

    /// Last accepted output, if seeded
    pub fn last_output(&self) -> Option<Position> {
        self.last_output
    }

    /// Forget the seed position
    pub fn reset(&mut self) {
        self.last_output = None;
    }
}
