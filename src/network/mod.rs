//! Feed-forward network
//!
//! Small fully-connected MLP trained online, one sample at a time.
//!
//! # Topology
//!
//! ```text
//! L = [in, h1, .., hk, out]
//!
//! a[0] = inputs
//! a[l] = tanh(W[l] · a[l-1] + b[l])   hidden layers
//! a[k] = W[k] · a[k-1] + b[k]         output layer (linear)
//! ```
//!
//! # Training
//!
//! Plain SGD on squared error. Every individual weight/bias delta is clamped
//! to `±MAX_PARAMETER_STEP` before it is applied, so a single noisy sample
//! cannot blow the weights up.
//!
//! # Weight layout
//!
//! `W[l]` is stored row-major as `[dest][src]`. [`Network::export_weights`]
//! concatenates the edges in layer order, so the flattened index of the
//! weight from neuron `i` of layer `l-1` to neuron `j` of layer `l` is
//! `offset(l) + j * L[l-1] + i`. Biases are exported separately by
//! [`Network::export_biases`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PredictorError, Result};

/// Largest magnitude a single parameter may move in one training step
pub const MAX_PARAMETER_STEP: f64 = 0.1;

/// Bias initialisation range (uniform in ±)
const BIAS_INIT_RANGE: f64 = 0.01;

/// Network shape and training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Neurons per hidden layer
    #[serde(default = "default_hidden_width")]
    pub hidden_width: usize,

    /// Number of hidden layers
    #[serde(default = "default_hidden_depth")]
    pub hidden_depth: usize,

    /// SGD learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Samples in the input slice (deltas = history_length - 1)
    #[serde(default = "default_history_length")]
    pub history_length: usize,

    /// Fixed RNG seed for weight initialisation (None = entropy)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_hidden_width() -> usize {
    16
}
fn default_hidden_depth() -> usize {
    1
}
fn default_learning_rate() -> f64 {
    0.01
}
fn default_history_length() -> usize {
    6
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_width: default_hidden_width(),
            hidden_depth: default_hidden_depth(),
            learning_rate: default_learning_rate(),
            history_length: default_history_length(),
            seed: None,
        }
    }
}

impl NetworkConfig {
    /// Validate ranges
    pub fn validate(&self) -> Result<()> {
        if self.hidden_width == 0 || self.hidden_depth == 0 {
            return Err(PredictorError::InvalidConfig(format!(
                "hidden layers must be non-empty (width={}, depth={})",
                self.hidden_width, self.hidden_depth
            )));
        }
        if self.history_length < 3 {
            return Err(PredictorError::InvalidConfig(format!(
                "history_length must be >= 3 (got {})",
                self.history_length
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PredictorError::InvalidConfig(format!(
                "learning_rate must be a positive finite number (got {})",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Fully-connected MLP with tanh hidden layers and a linear output
#[derive(Debug, Clone)]
pub struct Network {
    /// Neurons per layer, input first
    layer_sizes: Vec<usize>,
    /// One row-major `[dest][src]` matrix per edge
    weights: Vec<Vec<f64>>,
    /// One vector per non-input layer
    biases: Vec<Vec<f64>>,
    /// Completed training steps since construction
    iterations: u64,
}

impl Network {
    /// Create a network with entropy-seeded weights
    pub fn new(layer_sizes: &[usize]) -> Result<Self> {
        Self::with_rng(layer_sizes, &mut StdRng::from_entropy())
    }

    /// Create a network with deterministic weights
    pub fn with_seed(layer_sizes: &[usize], seed: u64) -> Result<Self> {
        Self::with_rng(layer_sizes, &mut StdRng::seed_from_u64(seed))
    }

    /// Create a network drawing initial weights from `rng`
    pub fn with_rng<R: Rng>(layer_sizes: &[usize], rng: &mut R) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(PredictorError::InvalidTopology(format!(
                "need at least 2 layers, got {}",
                layer_sizes.len()
            )));
        }
        if let Some(idx) = layer_sizes.iter().position(|&n| n == 0) {
            return Err(PredictorError::InvalidTopology(format!(
                "layer {} has zero width",
                idx
            )));
        }

        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        let mut biases = Vec::with_capacity(layer_sizes.len() - 1);

        for edge in layer_sizes.windows(2) {
            let (fan_in, fan_out) = (edge[0], edge[1]);
            let range = (2.0 / (fan_in + fan_out) as f64).sqrt();
            weights.push(
                (0..fan_in * fan_out)
                    .map(|_| rng.gen_range(-range..=range))
                    .collect(),
            );
            biases.push(
                (0..fan_out)
                    .map(|_| rng.gen_range(-BIAS_INIT_RANGE..=BIAS_INIT_RANGE))
                    .collect(),
            );
        }

        debug!("Network initialised: layers={:?}", layer_sizes);

        Ok(Self {
            layer_sizes: layer_sizes.to_vec(),
            weights,
            biases,
            iterations: 0,
        })
    }

    /// Layer widths, input first
    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    /// Width of the input layer
    pub fn input_size(&self) -> usize {
        self.layer_sizes[0]
    }

    /// Width of the output layer
    pub fn output_size(&self) -> usize {
        self.layer_sizes[self.layer_sizes.len() - 1]
    }

    /// Training steps completed since construction
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Evaluate the network
    pub fn forward(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        self.check_input(inputs)?;
        let mut activations = self.activations(inputs);
        Ok(activations.pop().unwrap_or_default())
    }

    /// One SGD step toward `targets`
    ///
    /// Returns the squared error of the pre-update output.
    pub fn train(&mut self, inputs: &[f64], targets: &[f64], learning_rate: f64) -> Result<f64> {
        self.check_input(inputs)?;
        if targets.len() != self.output_size() {
            return Err(PredictorError::TargetSizeMismatch {
                expected: self.output_size(),
                actual: targets.len(),
            });
        }
        if !inputs.iter().chain(targets).all(|v| v.is_finite()) {
            return Err(PredictorError::NonFiniteInput);
        }

        let activations = self.activations(inputs);
        let output = &activations[activations.len() - 1];

        // Linear output unit: dE/dz = (out - target)
        let mut delta: Vec<f64> = output
            .iter()
            .zip(targets)
            .map(|(o, t)| o - t)
            .collect();
        let loss: f64 = delta.iter().map(|d| d * d).sum();

        for edge in (0..self.weights.len()).rev() {
            let fan_in = self.layer_sizes[edge];
            let prev = &activations[edge];

            // Propagate before this edge's weights change
            let prev_delta = (edge > 0).then(|| {
                (0..fan_in)
                    .map(|i| {
                        let back: f64 = delta
                            .iter()
                            .enumerate()
                            .map(|(j, d)| self.weights[edge][j * fan_in + i] * d)
                            .sum();
                        back * (1.0 - prev[i] * prev[i])
                    })
                    .collect::<Vec<f64>>()
            });

            let weights = &mut self.weights[edge];
            let biases = &mut self.biases[edge];
            for (j, d) in delta.iter().enumerate() {
                let row = &mut weights[j * fan_in..(j + 1) * fan_in];
                for (w, a) in row.iter_mut().zip(prev) {
                    *w -= clamp_step(d * a * learning_rate);
                }
                biases[j] -= clamp_step(d * learning_rate);
            }

            if let Some(next) = prev_delta {
                delta = next;
            }
        }

        self.iterations += 1;

        if !self.parameters_finite() {
            return Err(PredictorError::NumericalDivergence {
                iterations: self.iterations,
            });
        }

        Ok(loss)
    }

    /// All weights flattened layer-major, then destination, then source
    ///
    /// Biases are not included.
    pub fn export_weights(&self) -> Vec<f64> {
        self.weights.iter().flatten().copied().collect()
    }

    /// All biases flattened layer-major
    pub fn export_biases(&self) -> Vec<f64> {
        self.biases.iter().flatten().copied().collect()
    }

    /// True when every weight and bias is finite
    pub fn parameters_finite(&self) -> bool {
        self.weights
            .iter()
            .chain(&self.biases)
            .flatten()
            .all(|v| v.is_finite())
    }

    fn check_input(&self, inputs: &[f64]) -> Result<()> {
        if inputs.len() != self.input_size() {
            return Err(PredictorError::FeatureSizeMismatch {
                expected: self.input_size(),
                actual: inputs.len(),
            });
        }
        Ok(())
    }

    /// Per-layer activations, `activations[0] == inputs`
    fn activations(&self, inputs: &[f64]) -> Vec<Vec<f64>> {
        let last_edge = self.weights.len() - 1;
        let mut activations = Vec::with_capacity(self.layer_sizes.len());
        activations.push(inputs.to_vec());

        for (edge, (weights, biases)) in self.weights.iter().zip(&self.biases).enumerate() {
            let fan_in = self.layer_sizes[edge];
            let prev = &activations[edge];
            let layer: Vec<f64> = biases
                .iter()
                .enumerate()
                .map(|(j, b)| {
                    let z = b + weights[j * fan_in..(j + 1) * fan_in]
                        .iter()
                        .zip(prev)
                        .map(|(w, a)| w * a)
                        .sum::<f64>();
                    if edge == last_edge {
                        z
                    } else {
                        z.tanh()
                    }
                })
                .collect();
            activations.push(layer);
        }

        activations
    }
}

fn clamp_step(step: f64) -> f64 {
    step.clamp(-MAX_PARAMETER_STEP, MAX_PARAMETER_STEP)
}
