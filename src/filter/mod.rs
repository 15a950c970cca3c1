//! Signal conditioning
//!
//! Low-latency filters applied to every raw sample before it reaches the
//! sliding window:
//! - **Chatter suppressor**: distance-gated hysteresis for micro-jitter
//! - **One Euro**: velocity-adaptive low-pass (time-aware)
//! - **Latency budget**: fixed-latency EMA
//!
//! # Pipeline
//!
//! ```text
//! raw (x, y, t)
//!   └─> ChatterSuppressor      (position only)
//!       └─> AxisPair<smoother> (independent X / Y instances)
//!           └─> conditioned sample
//! ```

mod chatter;
mod latency;
mod one_euro;

use serde::{Deserialize, Serialize};

use crate::error::{PredictorError, Result};
use crate::sample::{Position, Sample};

pub use chatter::ChatterSuppressor;
pub use latency::LatencyFilter;
pub use one_euro::OneEuroFilter;

/// Scalar, timestamp-aware filter applied per axis
pub trait ScalarFilter {
    /// Filter one value observed at `timestamp_ms`
    fn filter(&mut self, value: f64, timestamp_ms: f64) -> f64;

    /// Drop all state; the next call seeds the filter again
    fn reset(&mut self);
}

/// Two independent filter instances for X and Y
#[derive(Debug, Clone)]
pub struct AxisPair<F> {
    /// X axis filter
    pub x: F,
    /// Y axis filter
    pub y: F,
}

impl<F: ScalarFilter + Clone> AxisPair<F> {
    /// Use clones of `filter` for both axes
    pub fn new(filter: F) -> Self {
        Self {
            x: filter.clone(),
            y: filter,
        }
    }

    /// Filter a position
    pub fn filter(&mut self, position: Position, timestamp_ms: f64) -> Position {
        (
            self.x.filter(position.0, timestamp_ms),
            self.y.filter(position.1, timestamp_ms),
        )
    }

    /// Reset both axes
    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
    }
}

/// Smoother selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmootherKind {
    /// No smoothing
    Off,
    /// Velocity-adaptive One Euro filter
    #[default]
    OneEuro,
    /// Fixed latency-budget EMA
    LatencyBudget,
}

impl std::fmt::Display for SmootherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::OneEuro => write!(f, "one_euro"),
            Self::LatencyBudget => write!(f, "latency_budget"),
        }
    }
}

impl std::str::FromStr for SmootherKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "one_euro" | "oneeuro" | "adaptive" => Ok(Self::OneEuro),
            "latency_budget" | "latency" | "ema" => Ok(Self::LatencyBudget),
            _ => Err(format!("Unknown smoother: {}", s)),
        }
    }
}

/// Configuration for the conditioning stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Chatter threshold in position units (0 disables suppression)
    #[serde(default = "default_chatter_threshold")]
    pub chatter_threshold: f64,

    /// How fast sub-threshold drift is followed (0.0-1.0 typical)
    #[serde(default = "default_chatter_latency_factor")]
    pub chatter_latency_factor: f64,

    /// Which smoother runs after chatter suppression
    #[serde(default)]
    pub smoother: SmootherKind,

    /// One Euro minimum cutoff (Hz)
    #[serde(default = "default_min_cutoff")]
    pub min_cutoff: f64,

    /// One Euro speed coefficient
    #[serde(default = "default_beta")]
    pub beta: f64,

    /// One Euro derivative cutoff (Hz)
    #[serde(default = "default_d_cutoff")]
    pub d_cutoff: f64,

    /// Latency budget for the EMA smoother (ms)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
}

fn default_chatter_threshold() -> f64 {
    1.5
}
fn default_chatter_latency_factor() -> f64 {
    0.5
}
fn default_min_cutoff() -> f64 {
    1.0
}
fn default_beta() -> f64 {
    0.01
}
fn default_d_cutoff() -> f64 {
    1.0
}
fn default_latency_ms() -> f64 {
    2.0
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            chatter_threshold: default_chatter_threshold(),
            chatter_latency_factor: default_chatter_latency_factor(),
            smoother: SmootherKind::default(),
            min_cutoff: default_min_cutoff(),
            beta: default_beta(),
            d_cutoff: default_d_cutoff(),
            latency_ms: default_latency_ms(),
        }
    }
}

impl FilterConfig {
    /// Reject values that would make a filter divide by zero or diverge
    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.chatter_threshold,
            self.chatter_latency_factor,
            self.min_cutoff,
            self.beta,
            self.d_cutoff,
            self.latency_ms,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(PredictorError::InvalidConfig(
                "filter parameters must be finite".to_string(),
            ));
        }
        if self.chatter_threshold < 0.0 || self.chatter_latency_factor < 0.0 {
            return Err(PredictorError::InvalidConfig(format!(
                "chatter threshold ({}) and latency factor ({}) must be >= 0",
                self.chatter_threshold, self.chatter_latency_factor
            )));
        }
        if self.smoother == SmootherKind::OneEuro && (self.min_cutoff <= 0.0 || self.d_cutoff <= 0.0)
        {
            return Err(PredictorError::InvalidConfig(format!(
                "One Euro cutoffs must be > 0 (min_cutoff={}, d_cutoff={})",
                self.min_cutoff, self.d_cutoff
            )));
        }
        if self.beta < 0.0 || self.latency_ms < 0.0 {
            return Err(PredictorError::InvalidConfig(format!(
                "beta ({}) and latency_ms ({}) must be >= 0",
                self.beta, self.latency_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Smoother {
    Off,
    OneEuro(AxisPair<OneEuroFilter>),
    LatencyBudget(AxisPair<LatencyFilter>),
}

/// Full conditioning chain for the producer path
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    chatter: ChatterSuppressor,
    smoother: Smoother,
}

impl SignalConditioner {
    /// Build the chain described by `config`
    pub fn new(config: &FilterConfig) -> Self {
        let smoother = match config.smoother {
            SmootherKind::Off => Smoother::Off,
            SmootherKind::OneEuro => Smoother::OneEuro(AxisPair::new(OneEuroFilter::new(
                config.min_cutoff,
                config.beta,
                config.d_cutoff,
            ))),
            SmootherKind::LatencyBudget => {
                Smoother::LatencyBudget(AxisPair::new(LatencyFilter::new(config.latency_ms)))
            }
        };

        Self {
            chatter: ChatterSuppressor::new(
                config.chatter_threshold,
                config.chatter_latency_factor,
            ),
            smoother,
        }
    }

    /// Condition one raw sample
    pub fn condition(&mut self, raw: Sample) -> Sample {
        let position = self.chatter.filter(raw.position);
        let position = match &mut self.smoother {
            Smoother::Off => position,
            Smoother::OneEuro(pair) => pair.filter(position, raw.timestamp),
            Smoother::LatencyBudget(pair) => pair.filter(position, raw.timestamp),
        };
        Sample::new(position, raw.timestamp)
    }

    /// Reset all filter state
    pub fn reset(&mut self) {
        self.chatter.reset();
        match &mut self.smoother {
            Smoother::Off => {}
            Smoother::OneEuro(pair) => pair.reset(),
            Smoother::LatencyBudget(pair) => pair.reset(),
        }
    }
}
