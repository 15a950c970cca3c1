//! Sliding-window feature pipeline
//!
//! Turns the recent raw-sample history into network inputs and targets, and
//! drives one training step per raw sample.
//!
//! # Feature layout
//!
//! For an input slice of `H` samples there are `D = H - 1` deltas:
//!
//! | Block | Length | Scale | Present when |
//! |-------|--------|-------|--------------|
//! | Position deltas (x, y interleaved) | 2D | `1 / delta_scale` | always |
//! | Absolute positions of each delta's end point | 2D | `1 / absolute_scale` | `FeatureSet` includes absolute |
//! | Inter-sample gaps (ms) | D | `1 / time_scale` | `FeatureSet` includes time |
//!
//! The target is the newest delta (the one after the slice), normalised like
//! the input deltas.
//!
//! The layout is a pure function of ([`FeaturePolicy`], history length);
//! [`Topology`] bundles everything that decides the network's shape so that a
//! single equality check decides whether the network must be rebuilt.

mod pipeline;
mod window;

use serde::{Deserialize, Serialize};

use crate::error::{PredictorError, Result};
use crate::network::{Network, NetworkConfig};
use crate::sample::Sample;

pub use pipeline::TrainingPipeline;
pub use window::SlidingWindow;

/// Fixed interpolation fractions used for synthetic training slices
pub const INTERPOLATION_FRACTIONS: [f64; 3] = [0.5, 0.33, 0.67];

/// Which feature blocks follow the position deltas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// Position deltas only
    #[default]
    Deltas,
    /// Deltas plus absolute positions
    DeltasAbsolute,
    /// Deltas plus inter-sample time gaps
    DeltasTime,
    /// Deltas, absolute positions and time gaps
    DeltasAbsoluteTime,
}

impl FeatureSet {
    /// Build from the two independent toggles
    pub fn from_flags(absolute_position: bool, time_delta: bool) -> Self {
        match (absolute_position, time_delta) {
            (false, false) => Self::Deltas,
            (true, false) => Self::DeltasAbsolute,
            (false, true) => Self::DeltasTime,
            (true, true) => Self::DeltasAbsoluteTime,
        }
    }

    /// Absolute-position block present
    pub fn includes_absolute(&self) -> bool {
        matches!(self, Self::DeltasAbsolute | Self::DeltasAbsoluteTime)
    }

    /// Time-gap block present
    pub fn includes_time(&self) -> bool {
        matches!(self, Self::DeltasTime | Self::DeltasAbsoluteTime)
    }
}

impl std::fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deltas => write!(f, "deltas"),
            Self::DeltasAbsolute => write!(f, "deltas+absolute"),
            Self::DeltasTime => write!(f, "deltas+time"),
            Self::DeltasAbsoluteTime => write!(f, "deltas+absolute+time"),
        }
    }
}

impl std::str::FromStr for FeatureSet {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deltas" | "delta" => Ok(Self::Deltas),
            "deltas_absolute" | "deltas+absolute" | "absolute" => Ok(Self::DeltasAbsolute),
            "deltas_time" | "deltas+time" | "time" => Ok(Self::DeltasTime),
            "deltas_absolute_time" | "deltas+absolute+time" | "all" | "full" => {
                Ok(Self::DeltasAbsoluteTime)
            }
            _ => Err(format!("Unknown feature set: {}", s)),
        }
    }
}

/// Synthetic training policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrainingAugmentation {
    /// Train on real samples only
    #[default]
    None,
    /// Add interpolated slices at fixed fractions
    Interpolated,
    /// As `Interpolated`, but short back-and-forth segments train toward zero
    InterpolatedDampReversals,
}

impl TrainingAugmentation {
    /// Whether synthetic slices are generated at all
    pub fn interpolates(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Complete feature policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePolicy {
    /// Input blocks
    #[serde(default)]
    pub features: FeatureSet,

    /// Append the engine's last prediction as the newest history point
    #[serde(default)]
    pub self_feeding: bool,

    /// Synthetic training samples
    #[serde(default)]
    pub augmentation: TrainingAugmentation,

    /// Synthetic slices per real sample (1-3)
    #[serde(default = "default_interpolation_points")]
    pub interpolation_points: usize,

    /// Divisor for position deltas
    #[serde(default = "default_delta_scale")]
    pub delta_scale: f64,

    /// Divisor for absolute positions
    #[serde(default = "default_absolute_scale")]
    pub absolute_scale: f64,

    /// Divisor for time gaps (ms)
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,

    /// Both deltas shorter than this count as a noisy reversal
    #[serde(default = "default_reversal_distance")]
    pub reversal_distance: f64,

    /// Learning-rate multiplier for reversal damping
    #[serde(default = "default_reversal_learning_scale")]
    pub reversal_learning_scale: f64,
}

fn default_interpolation_points() -> usize {
    1
}
fn default_delta_scale() -> f64 {
    10.0
}
fn default_absolute_scale() -> f64 {
    1000.0
}
fn default_time_scale() -> f64 {
    10.0
}
fn default_reversal_distance() -> f64 {
    2.0
}
fn default_reversal_learning_scale() -> f64 {
    0.25
}

impl Default for FeaturePolicy {
    fn default() -> Self {
        Self {
            features: FeatureSet::default(),
            self_feeding: false,
            augmentation: TrainingAugmentation::default(),
            interpolation_points: default_interpolation_points(),
            delta_scale: default_delta_scale(),
            absolute_scale: default_absolute_scale(),
            time_scale: default_time_scale(),
            reversal_distance: default_reversal_distance(),
            reversal_learning_scale: default_reversal_learning_scale(),
        }
    }
}

impl FeaturePolicy {
    /// Validate ranges
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("delta_scale", self.delta_scale),
            ("absolute_scale", self.absolute_scale),
            ("time_scale", self.time_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PredictorError::InvalidConfig(format!(
                    "{} must be a positive finite number (got {})",
                    name, value
                )));
            }
        }
        if !(1..=INTERPOLATION_FRACTIONS.len()).contains(&self.interpolation_points) {
            return Err(PredictorError::InvalidConfig(format!(
                "interpolation_points must be 1-{} (got {})",
                INTERPOLATION_FRACTIONS.len(),
                self.interpolation_points
            )));
        }
        if !self.reversal_distance.is_finite()
            || self.reversal_distance < 0.0
            || !self.reversal_learning_scale.is_finite()
            || self.reversal_learning_scale < 0.0
        {
            return Err(PredictorError::InvalidConfig(
                "reversal damping parameters must be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Interpolation fractions in use
    pub fn fractions(&self) -> &'static [f64] {
        let n = self.interpolation_points.min(INTERPOLATION_FRACTIONS.len());
        &INTERPOLATION_FRACTIONS[..n]
    }
}

/// Feature vector layout for one (policy, history length) pair
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    deltas: usize,
    features: FeatureSet,
    delta_scale: f64,
    absolute_scale: f64,
    time_scale: f64,
}

impl FeatureLayout {
    /// Layout for a policy and input-slice length
    pub fn for_policy(policy: &FeaturePolicy, history_length: usize) -> Self {
        Self {
            deltas: history_length.saturating_sub(1),
            features: policy.features,
            delta_scale: policy.delta_scale,
            absolute_scale: policy.absolute_scale,
            time_scale: policy.time_scale,
        }
    }

    /// Number of deltas fed to the network
    pub fn deltas(&self) -> usize {
        self.deltas
    }

    /// Samples needed to build one feature vector
    pub fn slice_len(&self) -> usize {
        self.deltas + 1
    }

    /// Divisor applied to position deltas
    pub fn delta_scale(&self) -> f64 {
        self.delta_scale
    }

    /// Feature vector length
    pub fn size(&self) -> usize {
        let mut size = 2 * self.deltas;
        if self.features.includes_absolute() {
            size += 2 * self.deltas;
        }
        if self.features.includes_time() {
            size += self.deltas;
        }
        size
    }

    /// Build a feature vector from exactly `slice_len()` samples, oldest first
    pub fn features(&self, slice: &[Sample]) -> Result<Vec<f64>> {
        if slice.len() != self.slice_len() {
            return Err(PredictorError::InsufficientHistory {
                have: slice.len(),
                need: self.slice_len(),
            });
        }

        let mut out = Vec::with_capacity(self.size());
        for pair in slice.windows(2) {
            let (dx, dy) = pair[1].delta_from(&pair[0]);
            out.push(dx / self.delta_scale);
            out.push(dy / self.delta_scale);
        }
        if self.features.includes_absolute() {
            for s in &slice[1..] {
                out.push(s.position.0 / self.absolute_scale);
                out.push(s.position.1 / self.absolute_scale);
            }
        }
        if self.features.includes_time() {
            for pair in slice.windows(2) {
                out.push((pair[1].timestamp - pair[0].timestamp) / self.time_scale);
            }
        }
        Ok(out)
    }

    /// Normalised training target for the step `from -> to`
    pub fn target(&self, from: &Sample, to: &Sample) -> [f64; 2] {
        let (dx, dy) = to.delta_from(from);
        [dx / self.delta_scale, dy / self.delta_scale]
    }
}

/// Everything that determines the network's shape
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    /// Samples in the input slice
    pub history_length: usize,
    /// Neurons per hidden layer
    pub hidden_width: usize,
    /// Number of hidden layers
    pub hidden_depth: usize,
    /// Feature policy
    pub policy: FeaturePolicy,
}

impl Topology {
    /// Topology described by the configuration pair
    pub fn from_config(network: &NetworkConfig, policy: &FeaturePolicy) -> Self {
        Self {
            history_length: network.history_length,
            hidden_width: network.hidden_width,
            hidden_depth: network.hidden_depth,
            policy: policy.clone(),
        }
    }

    /// Feature layout for this topology
    pub fn layout(&self) -> FeatureLayout {
        FeatureLayout::for_policy(&self.policy, self.history_length)
    }

    /// Layer widths `[features, hidden.., 2]`
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_depth + 2);
        sizes.push(self.layout().size());
        sizes.extend(std::iter::repeat(self.hidden_width).take(self.hidden_depth));
        sizes.push(2);
        sizes
    }

    /// Fresh network for this topology
    pub fn build_network(&self, seed: Option<u64>) -> Result<Network> {
        let sizes = self.layer_sizes();
        match seed {
            Some(seed) => Network::with_seed(&sizes, seed),
            None => Network::new(&sizes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, step: f64, dt: f64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample::new((i as f64 * step, 100.0 + i as f64), i as f64 * dt))
            .collect()
    }

    #[test]
    fn test_layout_sizes() {
        let mut policy = FeaturePolicy::default();
        assert_eq!(FeatureLayout::for_policy(&policy, 6).size(), 10);

        policy.features = FeatureSet::DeltasAbsolute;
        assert_eq!(FeatureLayout::for_policy(&policy, 6).size(), 20);

        policy.features = FeatureSet::DeltasTime;
        assert_eq!(FeatureLayout::for_policy(&policy, 6).size(), 15);

        policy.features = FeatureSet::DeltasAbsoluteTime;
        assert_eq!(FeatureLayout::for_policy(&policy, 6).size(), 25);
    }

    #[test]
    fn test_features_match_layout_size() {
        let samples = line(6, 4.0, 8.0);
        for set in [
            FeatureSet::Deltas,
            FeatureSet::DeltasAbsolute,
            FeatureSet::DeltasTime,
            FeatureSet::DeltasAbsoluteTime,
        ] {
            let policy = FeaturePolicy {
                features: set,
                ..FeaturePolicy::default()
            };
            let layout = FeatureLayout::for_policy(&policy, 6);
            assert_eq!(layout.features(&samples).unwrap().len(), layout.size());
        }
    }

    #[test]
    fn test_feature_values() {
        let policy = FeaturePolicy {
            features: FeatureSet::DeltasAbsoluteTime,
            ..FeaturePolicy::default()
        };
        let layout = FeatureLayout::for_policy(&policy, 3);
        let samples = line(3, 10.0, 8.0);
        let f = layout.features(&samples).unwrap();

        // deltas: (10, 1) / 10 twice
        assert_eq!(&f[0..4], &[1.0, 0.1, 1.0, 0.1]);
        // absolute end points / 1000
        assert_eq!(&f[4..8], &[0.01, 0.101, 0.02, 0.102]);
        // gaps 8ms / 10
        assert_eq!(&f[8..10], &[0.8, 0.8]);
    }

    #[test]
    fn test_wrong_slice_length_rejected() {
        let layout = FeatureLayout::for_policy(&FeaturePolicy::default(), 6);
        assert!(matches!(
            layout.features(&line(4, 1.0, 1.0)),
            Err(PredictorError::InsufficientHistory { have: 4, need: 6 })
        ));
    }

    #[test]
    fn test_target_normalised() {
        let layout = FeatureLayout::for_policy(&FeaturePolicy::default(), 6);
        let a = Sample::new((0.0, 0.0), 0.0);
        let b = Sample::new((5.0, -20.0), 8.0);
        assert_eq!(layout.target(&a, &b), [0.5, -2.0]);
    }

    #[test]
    fn test_topology_layer_sizes() {
        let network = NetworkConfig {
            hidden_width: 12,
            hidden_depth: 3,
            ..NetworkConfig::default()
        };
        let topology = Topology::from_config(&network, &FeaturePolicy::default());
        assert_eq!(topology.layer_sizes(), vec![10, 12, 12, 12, 2]);

        let net = topology.build_network(Some(1)).unwrap();
        assert_eq!(net.input_size(), topology.layout().size());
    }

    #[test]
    fn test_topology_equality_tracks_policy() {
        let network = NetworkConfig::default();
        let a = Topology::from_config(&network, &FeaturePolicy::default());
        let b = Topology::from_config(
            &network,
            &FeaturePolicy {
                self_feeding: true,
                ..FeaturePolicy::default()
            },
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_feature_set_flags_round_trip() {
        for (abs, time) in [(false, false), (true, false), (false, true), (true, true)] {
            let set = FeatureSet::from_flags(abs, time);
            assert_eq!(set.includes_absolute(), abs);
            assert_eq!(set.includes_time(), time);
        }
    }

    #[test]
    fn test_policy_validation() {
        assert!(FeaturePolicy::default().validate().is_ok());

        let policy = FeaturePolicy {
            interpolation_points: 4,
            ..FeaturePolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = FeaturePolicy {
            delta_scale: 0.0,
            ..FeaturePolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_fractions() {
        let policy = FeaturePolicy {
            interpolation_points: 3,
            ..FeaturePolicy::default()
        };
        assert_eq!(policy.fractions(), &[0.5, 0.33, 0.67]);
    }
}
