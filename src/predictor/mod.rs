//! Predictor
//!
//! Extrapolates near-future positions from the current history using the
//! trained network. Prediction is read-only: it never touches the window or
//! the weights.
//!
//! # Single step
//!
//! ```text
//! delta = forward(features(history)) * delta_scale
//! pred  = base + delta * lookahead * gain
//! ```
//!
//! # Multi-step
//!
//! Each predicted point is appended to a private working copy of the
//! history, the features are rebuilt and the network is evaluated again.
//! The working copy never grows beyond one input slice.
//!
//! # Numerical safety
//!
//! A non-finite network output stops the prediction and the last finite
//! position (the base, for a single step) is returned instead.

mod motion;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PredictorError, Result};
use crate::features::FeatureLayout;
use crate::network::Network;
use crate::sample::{Position, Sample};

pub use motion::MotionEstimator;

/// How the lookahead factor is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LookaheadMode {
    /// Constant `factor`
    Fixed,
    /// `clamp(1 + speed * velocity_gain, min, max)`
    Dynamic,
    /// Scale the next-sample delta to reach the requested target time
    #[default]
    Timed,
    /// Recursive multi-step prediction (`steps` forward passes)
    Steps,
}

impl std::fmt::Display for LookaheadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Dynamic => write!(f, "dynamic"),
            Self::Timed => write!(f, "timed"),
            Self::Steps => write!(f, "steps"),
        }
    }
}

impl std::str::FromStr for LookaheadMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "constant" => Ok(Self::Fixed),
            "dynamic" | "velocity" => Ok(Self::Dynamic),
            "timed" | "time" => Ok(Self::Timed),
            "steps" | "recursive" | "multi" => Ok(Self::Steps),
            _ => Err(format!("Unknown lookahead mode: {}", s)),
        }
    }
}

/// Lookahead configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookaheadConfig {
    /// Lookahead selection mode
    #[serde(default)]
    pub mode: LookaheadMode,

    /// Factor used in `Fixed` mode
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Lower bound for `Dynamic` mode
    #[serde(default = "default_min_lookahead")]
    pub min_lookahead: f64,

    /// Upper bound for `Dynamic` and `Timed` modes
    #[serde(default = "default_max_lookahead")]
    pub max_lookahead: f64,

    /// Speed coefficient `k` for `Dynamic` mode (per unit/ms)
    #[serde(default = "default_velocity_gain")]
    pub velocity_gain: f64,

    /// Forward passes in `Steps` mode
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Multiplier applied to every predicted delta
    #[serde(default = "default_gain")]
    pub gain: f64,
}

fn default_factor() -> f64 {
    1.0
}
fn default_min_lookahead() -> f64 {
    0.5
}
fn default_max_lookahead() -> f64 {
    3.0
}
fn default_velocity_gain() -> f64 {
    0.5
}
fn default_steps() -> usize {
    2
}
fn default_gain() -> f64 {
    1.0
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            mode: LookaheadMode::default(),
            factor: default_factor(),
            min_lookahead: default_min_lookahead(),
            max_lookahead: default_max_lookahead(),
            velocity_gain: default_velocity_gain(),
            steps: default_steps(),
            gain: default_gain(),
        }
    }
}

impl LookaheadConfig {
    /// Validate ranges
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.factor,
            self.min_lookahead,
            self.max_lookahead,
            self.velocity_gain,
            self.gain,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PredictorError::InvalidConfig(
                "lookahead parameters must be finite".to_string(),
            ));
        }
        if self.min_lookahead < 0.0 || self.min_lookahead > self.max_lookahead {
            return Err(PredictorError::InvalidConfig(format!(
                "lookahead bounds invalid: min={} max={}",
                self.min_lookahead, self.max_lookahead
            )));
        }
        if self.mode == LookaheadMode::Steps && self.steps == 0 {
            return Err(PredictorError::InvalidConfig(
                "steps mode requires steps >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the lookahead for one prediction
    ///
    /// `base_timestamp` is the timestamp of the newest history point.
    pub fn resolve(
        &self,
        target_time: f64,
        base_timestamp: f64,
        motion: &MotionEstimator,
    ) -> Lookahead {
        match self.mode {
            LookaheadMode::Fixed => Lookahead::Scale(self.factor),
            LookaheadMode::Dynamic => Lookahead::Scale(dynamic_lookahead(
                motion.speed(),
                self.velocity_gain,
                self.min_lookahead,
                self.max_lookahead,
            )),
            LookaheadMode::Timed => {
                let interval = motion.mean_interval();
                let factor = if interval > 0.0 {
                    ((target_time - base_timestamp) / interval).clamp(0.0, self.max_lookahead)
                } else {
                    self.factor
                };
                Lookahead::Scale(factor)
            }
            LookaheadMode::Steps => Lookahead::Steps(self.steps),
        }
    }
}

/// Speed-derived lookahead factor
pub fn dynamic_lookahead(speed: f64, k: f64, min: f64, max: f64) -> f64 {
    (1.0 + speed * k).clamp(min, max)
}

/// Resolved lookahead for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookahead {
    /// Multiply the single-step delta
    Scale(f64),
    /// Recurse this many steps
    Steps(usize),
}

/// One prediction request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionRequest {
    /// Time (ms, host clock) the prediction is for
    pub target_time: f64,
    /// Lookahead factor or step count
    pub lookahead: Lookahead,
    /// Delta multiplier
    pub gain: f64,
}

/// Where a prediction came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// Network extrapolation
    Model,
    /// Window not full; last raw position (or origin)
    NotReady,
    /// Network produced NaN/Infinity; last finite position
    NonFinite,
}

/// Prediction result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Predicted (or fallback) sample
    pub sample: Sample,
    /// Source of the sample
    pub kind: PredictionKind,
}

impl Prediction {
    /// Fallback prediction at `sample`
    pub fn fallback(sample: Sample, kind: PredictionKind) -> Self {
        Self { sample, kind }
    }

    /// Predicted position
    pub fn position(&self) -> Position {
        self.sample.position
    }

    /// True when the network produced this prediction
    pub fn is_model(&self) -> bool {
        self.kind == PredictionKind::Model
    }
}

/// Read-only view pairing a network with its feature layout
#[derive(Debug, Clone, Copy)]
pub struct Predictor<'a> {
    network: &'a Network,
    layout: &'a FeatureLayout,
}

impl<'a> Predictor<'a> {
    /// Create a view
    pub fn new(network: &'a Network, layout: &'a FeatureLayout) -> Self {
        Self { network, layout }
    }

    /// Predicted next-sample delta in position units
    ///
    /// `history` must end with exactly one input slice; older entries are
    /// ignored. `None` on non-finite output.
    pub fn next_delta(&self, history: &[Sample]) -> Option<Position> {
        let need = self.layout.slice_len();
        if history.len() < need {
            return None;
        }
        let slice = &history[history.len() - need..];

        let output = match self
            .layout
            .features(slice)
            .and_then(|f| self.network.forward(&f))
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Prediction forward pass rejected: {}", e);
                return None;
            }
        };

        let scale = self.layout.delta_scale();
        let delta = (output[0] * scale, output[1] * scale);
        if delta.0.is_finite() && delta.1.is_finite() {
            Some(delta)
        } else {
            debug!("Non-finite network output: {:?}", output);
            None
        }
    }

    /// Single-step prediction for `target_time`
    pub fn predict(&self, history: &[Sample], lookahead: f64, gain: f64, target_time: f64) -> Prediction {
        let Some(base) = history.last().copied() else {
            return Prediction::fallback(Sample::new((0.0, 0.0), target_time), PredictionKind::NotReady);
        };

        match self.next_delta(history) {
            Some((dx, dy)) => {
                let k = lookahead * gain;
                let position = (base.position.0 + dx * k, base.position.1 + dy * k);
                if position.0.is_finite() && position.1.is_finite() {
                    Prediction {
                        sample: Sample::new(position, target_time),
                        kind: PredictionKind::Model,
                    }
                } else {
                    Prediction::fallback(base, PredictionKind::NonFinite)
                }
            }
            None => Prediction::fallback(base, PredictionKind::NonFinite),
        }
    }

    /// Recursive prediction returning every intermediate point
    ///
    /// Each step is placed `interval_ms` after the previous one. Stops early
    /// at the first non-finite step.
    pub fn predict_sequence(
        &self,
        history: &[Sample],
        steps: usize,
        gain: f64,
        interval_ms: f64,
    ) -> Vec<Sample> {
        let need = self.layout.slice_len();
        if history.len() < need {
            return Vec::new();
        }

        let mut working: Vec<Sample> = history[history.len() - need..].to_vec();
        let mut out = Vec::with_capacity(steps);

        for _ in 0..steps {
            let Some((dx, dy)) = self.next_delta(&working) else {
                break;
            };
            let last = working[working.len() - 1];
            let next = Sample::new(
                (last.position.0 + dx * gain, last.position.1 + dy * gain),
                last.timestamp + interval_ms,
            );
            if !next.is_finite() {
                break;
            }

            working.remove(0);
            working.push(next);
            out.push(next);
        }

        out
    }

    /// Recursive prediction returning only the final point
    pub fn predict_steps(
        &self,
        history: &[Sample],
        steps: usize,
        gain: f64,
        interval_ms: f64,
    ) -> Prediction {
        let Some(base) = history.last().copied() else {
            return Prediction::fallback(Sample::new((0.0, 0.0), 0.0), PredictionKind::NotReady);
        };

        let sequence = self.predict_sequence(history, steps, gain, interval_ms);
        match sequence.last() {
            Some(last) if sequence.len() == steps => Prediction {
                sample: *last,
                kind: PredictionKind::Model,
            },
            Some(last) => Prediction::fallback(*last, PredictionKind::NonFinite),
            None if steps == 0 => Prediction {
                sample: base,
                kind: PredictionKind::Model,
            },
            None => Prediction::fallback(base, PredictionKind::NonFinite),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeaturePolicy;

    fn setup() -> (Network, FeatureLayout) {
        let layout = FeatureLayout::for_policy(&FeaturePolicy::default(), 4);
        let net = Network::with_seed(&[layout.size(), 6, 2], 17).unwrap();
        (net, layout)
    }

    fn line(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new((i as f64 * 5.0, 0.0), i as f64 * 8.0))
            .collect()
    }

    #[test]
    fn test_dynamic_lookahead_bounds() {
        assert_eq!(dynamic_lookahead(0.0, 0.5, 0.5, 3.0), 1.0);
        assert_eq!(dynamic_lookahead(2.0, 0.5, 0.5, 3.0), 2.0);
        assert_eq!(dynamic_lookahead(100.0, 0.5, 0.5, 3.0), 3.0);
        assert_eq!(dynamic_lookahead(0.0, 0.5, 1.5, 3.0), 1.5);
    }

    #[test]
    fn test_resolve_modes() {
        let mut motion = MotionEstimator::new();
        for i in 0..10 {
            motion.update(&Sample::new((i as f64 * 8.0, 0.0), i as f64 * 4.0));
        }

        let mut config = LookaheadConfig::default();
        config.mode = LookaheadMode::Fixed;
        config.factor = 1.7;
        assert_eq!(config.resolve(0.0, 0.0, &motion), Lookahead::Scale(1.7));

        config.mode = LookaheadMode::Timed;
        // 6ms ahead at a 4ms interval
        assert_eq!(config.resolve(46.0, 40.0, &motion), Lookahead::Scale(1.5));
        // Clamped
        assert_eq!(config.resolve(1000.0, 40.0, &motion), Lookahead::Scale(3.0));
        assert_eq!(config.resolve(0.0, 40.0, &motion), Lookahead::Scale(0.0));

        config.mode = LookaheadMode::Steps;
        config.steps = 4;
        assert_eq!(config.resolve(0.0, 0.0, &motion), Lookahead::Steps(4));
    }

    #[test]
    fn test_predict_is_read_only() {
        let (net, layout) = setup();
        let weights = net.export_weights();
        let predictor = Predictor::new(&net, &layout);
        let history = line(4);

        let a = predictor.predict(&history, 1.0, 1.0, 30.0);
        let b = predictor.predict(&history, 1.0, 1.0, 30.0);
        assert_eq!(a, b);
        assert!(a.is_model());
        assert_eq!(net.export_weights(), weights);
    }

    #[test]
    fn test_zero_lookahead_returns_base() {
        let (net, layout) = setup();
        let predictor = Predictor::new(&net, &layout);
        let history = line(4);
        let p = predictor.predict(&history, 0.0, 1.0, 24.0);
        assert_eq!(p.position(), history[3].position);
    }

    #[test]
    fn test_short_history_is_non_finite_fallback() {
        let (net, layout) = setup();
        let predictor = Predictor::new(&net, &layout);
        let history = line(2);
        let p = predictor.predict(&history, 1.0, 1.0, 24.0);
        assert_eq!(p.kind, PredictionKind::NonFinite);
        assert_eq!(p.position(), history[1].position);
    }

    #[test]
    fn test_sequence_is_bounded_and_timed() {
        let (net, layout) = setup();
        let predictor = Predictor::new(&net, &layout);
        let history = line(4);

        let seq = predictor.predict_sequence(&history, 5, 1.0, 8.0);
        assert_eq!(seq.len(), 5);
        for (i, s) in seq.iter().enumerate() {
            assert_eq!(s.timestamp, 24.0 + 8.0 * (i + 1) as f64);
            assert!(s.is_finite());
        }

        let last = predictor.predict_steps(&history, 5, 1.0, 8.0);
        assert!(last.is_model());
        assert_eq!(last.sample, seq[4]);
    }

    #[test]
    fn test_single_step_matches_sequence_head() {
        let (net, layout) = setup();
        let predictor = Predictor::new(&net, &layout);
        let history = line(4);

        let single = predictor.predict(&history, 1.0, 1.0, 32.0);
        let seq = predictor.predict_sequence(&history, 1, 1.0, 8.0);
        assert_eq!(single.sample, seq[0]);
    }

    #[test]
    fn test_lookahead_mode_from_str() {
        assert_eq!(
            "velocity".parse::<LookaheadMode>().unwrap(),
            LookaheadMode::Dynamic
        );
        assert_eq!(
            "recursive".parse::<LookaheadMode>().unwrap(),
            LookaheadMode::Steps
        );
        assert!("sideways".parse::<LookaheadMode>().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(LookaheadConfig::default().validate().is_ok());

        let mut config = LookaheadConfig::default();
        config.min_lookahead = 5.0;
        assert!(config.validate().is_err());

        let mut config = LookaheadConfig::default();
        config.mode = LookaheadMode::Steps;
        config.steps = 0;
        assert!(config.validate().is_err());
    }
}
