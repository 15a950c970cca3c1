//! Online training pipeline
//!
//! Owns the raw window and the network. Every raw sample that arrives once the
//! window is full triggers exactly one real training step, plus the
//! interpolated steps the active [`TrainingAugmentation`] asks for.

use tracing::{debug, trace};

use super::{FeatureLayout, FeaturePolicy, SlidingWindow, Topology, TrainingAugmentation};
use crate::error::{PredictorError, Result};
use crate::network::{Network, NetworkConfig};
use crate::predictor::{Lookahead, MotionEstimator, Prediction, PredictionKind, PredictionRequest, Predictor};
use crate::sample::{PredictedSample, Sample};

/// Window, network and training policy for one engine
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    window: SlidingWindow,
    network: Network,
    topology: Topology,
    layout: FeatureLayout,
    learning_rate: f64,
    seed: Option<u64>,
    motion: MotionEstimator,
    last_loss: Option<f64>,
}

impl TrainingPipeline {
    /// Build a pipeline with a freshly initialised network
    pub fn new(network: &NetworkConfig, policy: &FeaturePolicy) -> Result<Self> {
        network.validate()?;
        policy.validate()?;

        let topology = Topology::from_config(network, policy);
        let net = topology.build_network(network.seed)?;
        let layout = topology.layout();

        debug!(
            "Training pipeline created: layers={:?} features={} history={}",
            net.layer_sizes(),
            policy.features,
            topology.history_length
        );

        Ok(Self {
            window: SlidingWindow::new(topology.history_length + 1),
            network: net,
            topology,
            layout,
            learning_rate: network.learning_rate,
            seed: network.seed,
            motion: MotionEstimator::new(),
            last_loss: None,
        })
    }

    /// Append a raw sample and train once the window is full
    ///
    /// Returns the loss of the real training step, or `None` while warming up.
    pub fn push(&mut self, sample: Sample) -> Result<Option<f64>> {
        if !sample.is_finite() {
            return Err(PredictorError::InvalidSample(
                sample.position.0,
                sample.position.1,
            ));
        }

        self.motion.update(&sample);
        self.window.push(sample);

        if !self.window.is_full() {
            trace!(
                "Window warming up: {}/{}",
                self.window.len(),
                self.window.capacity()
            );
            return Ok(None);
        }

        let loss = self.train_step()?;
        self.last_loss = Some(loss);
        Ok(Some(loss))
    }

    fn train_step(&mut self) -> Result<f64> {
        let span: Vec<Sample> = self.window.iter().copied().collect();
        let h = self.topology.history_length;

        let inputs = self.layout.features(&span[..h])?;
        let target = self.layout.target(&span[h - 1], &span[h]);
        let loss = self.network.train(&inputs, &target, self.learning_rate)?;

        trace!(
            "Training step {}: loss={:.6}",
            self.network.iterations(),
            loss
        );

        if self.topology.policy.augmentation.interpolates() {
            self.train_interpolated(&span)?;
        }

        Ok(loss)
    }

    /// Train on slices whose last input sample is interpolated between its
    /// neighbours
    fn train_interpolated(&mut self, span: &[Sample]) -> Result<()> {
        let policy = &self.topology.policy;
        let h = span.len() - 1;
        let damp = policy.augmentation == TrainingAugmentation::InterpolatedDampReversals
            && is_noisy_reversal(span, policy.reversal_distance);

        let learning_rate = if damp {
            self.learning_rate * policy.reversal_learning_scale
        } else {
            self.learning_rate
        };
        if damp {
            trace!("Noisy reversal: damping toward zero at lr={}", learning_rate);
        }

        for &fraction in policy.fractions() {
            let mut synth = span.to_vec();
            synth[h - 1] = span[h - 2].lerp(&span[h], fraction);

            let inputs = self.layout.features(&synth[..h])?;
            let target = if damp {
                [0.0, 0.0]
            } else {
                self.layout.target(&synth[h - 1], &synth[h])
            };
            self.network.train(&inputs, &target, learning_rate)?;
        }

        Ok(())
    }

    /// Swap in a network built for `topology`
    ///
    /// The window keeps its newest samples; the iteration count restarts
    /// with the new network.
    pub fn rebuild(&mut self, topology: Topology, network: Network) -> Result<()> {
        let layout = topology.layout();
        if network.input_size() != layout.size() {
            return Err(PredictorError::FeatureSizeMismatch {
                expected: layout.size(),
                actual: network.input_size(),
            });
        }

        debug!(
            "Rebuilding network: {:?} -> {:?}",
            self.network.layer_sizes(),
            network.layer_sizes()
        );

        self.window.set_capacity(topology.history_length + 1);
        self.layout = layout;
        self.topology = topology;
        self.network = network;
        self.last_loss = None;
        Ok(())
    }

    /// Replace the network with fresh weights of the same shape
    pub fn reset_network(&mut self) -> Result<()> {
        let network = self.topology.build_network(self.seed)?;
        self.rebuild(self.topology.clone(), network)
    }

    /// Change the learning rate and seed without touching the network
    pub fn set_training(&mut self, learning_rate: f64, seed: Option<u64>) {
        self.learning_rate = learning_rate;
        self.seed = seed;
    }

    /// Drop every buffered sample and the motion estimate
    ///
    /// The network keeps its weights; training resumes once the window has
    /// refilled.
    pub fn clear_history(&mut self) {
        debug!("Clearing {} buffered samples", self.window.len());
        self.window.clear();
        self.motion.reset();
        self.last_loss = None;
    }

    /// True when the window holds a full span
    pub fn is_ready(&self) -> bool {
        self.window.is_full()
    }

    /// `InsufficientHistory` until the window holds a full span
    pub fn check_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(PredictorError::InsufficientHistory {
                have: self.window.len(),
                need: self.window.capacity(),
            })
        }
    }

    /// History used for prediction, oldest first
    ///
    /// With self-feeding enabled the last prediction replaces the oldest
    /// sample of the input slice as the newest point.
    pub fn prediction_history(&self, last_predicted: Option<&PredictedSample>) -> Vec<Sample> {
        let need = self.layout.slice_len();
        match last_predicted {
            Some(predicted) if self.topology.policy.self_feeding => {
                let mut history = self.window.tail(need - 1);
                history.push(*predicted.sample());
                history
            }
            _ => self.window.tail(need),
        }
    }

    /// Last raw position, or the origin before any sample
    pub fn fallback_sample(&self, timestamp: f64) -> Sample {
        let position = self
            .window
            .latest()
            .map(|s| s.position)
            .unwrap_or((0.0, 0.0));
        Sample::new(position, timestamp)
    }

    /// Serve one prediction request
    pub fn predict(
        &self,
        request: &PredictionRequest,
        last_predicted: Option<&PredictedSample>,
    ) -> Prediction {
        if !self.is_ready() {
            return Prediction::fallback(
                self.fallback_sample(request.target_time),
                PredictionKind::NotReady,
            );
        }

        let history = self.prediction_history(last_predicted);
        let predictor = Predictor::new(&self.network, &self.layout);

        match request.lookahead {
            Lookahead::Scale(factor) => {
                predictor.predict(&history, factor, request.gain, request.target_time)
            }
            Lookahead::Steps(steps) => {
                let p = predictor.predict_steps(
                    &history,
                    steps,
                    request.gain,
                    self.motion.mean_interval(),
                );
                Prediction {
                    sample: Sample::new(p.sample.position, request.target_time),
                    kind: p.kind,
                }
            }
        }
    }

    /// Recursive trajectory of `steps` points spaced one mean interval apart
    pub fn predict_sequence(
        &self,
        steps: usize,
        gain: f64,
        last_predicted: Option<&PredictedSample>,
    ) -> Vec<Sample> {
        if !self.is_ready() {
            return Vec::new();
        }
        let history = self.prediction_history(last_predicted);
        Predictor::new(&self.network, &self.layout).predict_sequence(
            &history,
            steps,
            gain,
            self.motion.mean_interval(),
        )
    }

    /// Current network
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Current topology
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Current feature layout
    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    /// Raw window
    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Speed and interval estimates
    pub fn motion(&self) -> &MotionEstimator {
        &self.motion
    }

    /// Loss of the most recent real training step
    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }
}

/// Two newest deltas point in opposing directions and are both short
pub(crate) fn is_noisy_reversal(span: &[Sample], max_distance: f64) -> bool {
    let n = span.len();
    if n < 3 {
        return false;
    }
    let a = span[n - 2].delta_from(&span[n - 3]);
    let b = span[n - 1].delta_from(&span[n - 2]);
    let dot = a.0 * b.0 + a.1 * b.1;
    dot < 0.0 && a.0.hypot(a.1) < max_distance && b.0.hypot(b.1) < max_distance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> NetworkConfig {
        NetworkConfig {
            seed: Some(seed),
            ..NetworkConfig::default()
        }
    }

    fn linear(i: usize) -> Sample {
        Sample::new((i as f64 * 5.0, 100.0 + i as f64 * 2.0), i as f64 * 8.0)
    }

    fn request(target_time: f64) -> PredictionRequest {
        PredictionRequest {
            target_time,
            lookahead: Lookahead::Scale(1.0),
            gain: 1.0,
        }
    }

    #[test]
    fn test_trains_once_per_sample_after_warmup() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        for i in 0..6 {
            assert_eq!(p.push(linear(i)).unwrap(), None);
            assert!(!p.is_ready());
        }
        assert!(p.push(linear(6)).unwrap().is_some());
        assert!(p.is_ready());
        assert_eq!(p.network().iterations(), 1);

        p.push(linear(7)).unwrap();
        assert_eq!(p.network().iterations(), 2);
    }

    #[test]
    fn test_interpolation_adds_steps() {
        let policy = FeaturePolicy {
            augmentation: TrainingAugmentation::Interpolated,
            interpolation_points: 3,
            ..FeaturePolicy::default()
        };
        let mut p = TrainingPipeline::new(&config(1), &policy).unwrap();
        for i in 0..7 {
            p.push(linear(i)).unwrap();
        }
        assert_eq!(p.network().iterations(), 4);
    }

    #[test]
    fn test_interpolated_step_trains_on_synthesized_slice() {
        let policy = FeaturePolicy {
            augmentation: TrainingAugmentation::Interpolated,
            interpolation_points: 1,
            ..FeaturePolicy::default()
        };
        let net = config(9);
        let curve: Vec<Sample> = (0..7)
            .map(|i| {
                let i = i as f64;
                Sample::new((i * i, 3.0 * i), i * 8.0)
            })
            .collect();

        let mut p = TrainingPipeline::new(&net, &policy).unwrap();
        for s in &curve {
            p.push(*s).unwrap();
        }
        assert_eq!(p.network().iterations(), 2);

        // Same two updates applied by hand to an identically seeded network
        let topology = Topology::from_config(&net, &policy);
        let layout = topology.layout();
        let mut twin = topology.build_network(net.seed).unwrap();

        let real_inputs = layout.features(&curve[..6]).unwrap();
        let real_target = layout.target(&curve[5], &curve[6]);
        twin.train(&real_inputs, &real_target, net.learning_rate).unwrap();

        // span[h-1] replaced by the midpoint of span[h-2] and span[h]
        let (a, c) = (curve[4], curve[6]);
        let mid = Sample::new(
            (
                a.position.0 + (c.position.0 - a.position.0) * 0.5,
                a.position.1 + (c.position.1 - a.position.1) * 0.5,
            ),
            a.timestamp + (c.timestamp - a.timestamp) * 0.5,
        );
        assert_eq!(mid.position, (26.0, 15.0));
        let mut synth = curve.clone();
        synth[5] = mid;

        let synth_inputs = layout.features(&synth[..6]).unwrap();
        let synth_target = layout.target(&mid, &curve[6]);
        assert_ne!(synth_inputs, real_inputs);
        assert_ne!(synth_target, real_target);
        twin.train(&synth_inputs, &synth_target, net.learning_rate).unwrap();

        assert_eq!(p.network().export_weights(), twin.export_weights());
        assert_eq!(p.network().export_biases(), twin.export_biases());
    }

    #[test]
    fn test_clear_history_restarts_warmup() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        for i in 0..8 {
            p.push(linear(i)).unwrap();
        }
        assert!(p.check_ready().is_ok());
        let iterations = p.network().iterations();

        p.clear_history();
        assert!(p.window().is_empty());
        assert_eq!(p.motion().speed(), 0.0);
        assert_eq!(p.network().iterations(), iterations);
        assert_eq!(
            p.check_ready(),
            Err(PredictorError::InsufficientHistory { have: 0, need: 7 })
        );
    }

    #[test]
    fn test_overflowing_deltas_rejected_as_input() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        p.push(Sample::new((-1e308, 0.0), 0.0)).unwrap();
        p.push(Sample::new((1e308, 0.0), 8.0)).unwrap();
        for i in 2..6 {
            p.push(Sample::new((i as f64, 0.0), i as f64 * 8.0)).unwrap();
        }
        assert_eq!(
            p.push(Sample::new((6.0, 0.0), 48.0)),
            Err(PredictorError::NonFiniteInput)
        );
        assert_eq!(p.network().iterations(), 0);
    }

    #[test]
    fn test_linear_motion_loss_trends_down() {
        let net = NetworkConfig {
            learning_rate: 0.05,
            ..config(3)
        };
        let mut p = TrainingPipeline::new(&net, &FeaturePolicy::default()).unwrap();
        let losses: Vec<f64> = (0..300)
            .filter_map(|i| p.push(linear(i)).unwrap())
            .collect();

        let early: f64 = losses[..5].iter().sum::<f64>() / 5.0;
        let late: f64 = losses[losses.len() - 5..].iter().sum::<f64>() / 5.0;
        assert!(late < early * 0.5, "early={} late={}", early, late);

        // Prediction lands near the true next point
        let prediction = p.predict(&request(300.0 * 8.0), None);
        let expected = linear(300).position;
        assert!(prediction.is_model());
        assert!((prediction.position().0 - expected.0).abs() < 1.0);
        assert!((prediction.position().1 - expected.1).abs() < 1.0);
    }

    #[test]
    fn test_not_ready_falls_back() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        let empty = p.predict(&request(10.0), None);
        assert_eq!(empty.kind, PredictionKind::NotReady);
        assert_eq!(empty.position(), (0.0, 0.0));

        p.push(Sample::new((42.0, -7.0), 0.0)).unwrap();
        let one = p.predict(&request(10.0), None);
        assert_eq!(one.kind, PredictionKind::NotReady);
        assert_eq!(one.position(), (42.0, -7.0));
    }

    #[test]
    fn test_self_feeding_history() {
        let policy = FeaturePolicy {
            self_feeding: true,
            ..FeaturePolicy::default()
        };
        let mut p = TrainingPipeline::new(&config(1), &policy).unwrap();
        for i in 0..7 {
            p.push(linear(i)).unwrap();
        }
        let predicted = PredictedSample::new(Sample::new((99.0, 99.0), 60.0));

        let history = p.prediction_history(Some(&predicted));
        assert_eq!(history.len(), 6);
        assert_eq!(history[5], *predicted.sample());
        assert_eq!(history[4], linear(6));

        assert_eq!(p.prediction_history(None).last(), Some(&linear(6)));
    }

    #[test]
    fn test_prediction_history_ignores_slot_without_self_feeding() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        for i in 0..7 {
            p.push(linear(i)).unwrap();
        }
        let predicted = PredictedSample::new(Sample::new((99.0, 99.0), 60.0));
        assert_eq!(p.prediction_history(Some(&predicted)).last(), Some(&linear(6)));
    }

    #[test]
    fn test_rebuild_resets_iterations_and_resizes_window() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        for i in 0..10 {
            p.push(linear(i)).unwrap();
        }
        assert!(p.network().iterations() > 0);

        let topology = Topology {
            history_length: 4,
            ..p.topology().clone()
        };
        let network = topology.build_network(Some(2)).unwrap();
        p.rebuild(topology, network).unwrap();

        assert_eq!(p.network().iterations(), 0);
        assert_eq!(p.window().capacity(), 5);
        assert!(p.is_ready());
        assert_eq!(p.network().input_size(), p.layout().size());
    }

    #[test]
    fn test_rebuild_rejects_mismatched_network() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        let wrong = Network::with_seed(&[3, 4, 2], 1).unwrap();
        let topology = p.topology().clone();
        assert!(matches!(
            p.rebuild(topology, wrong),
            Err(PredictorError::FeatureSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        assert!(p.push(Sample::new((f64::NAN, 0.0), 0.0)).is_err());
        assert!(p.window().is_empty());
    }

    #[test]
    fn test_noisy_reversal_detection() {
        let back_and_forth = [
            Sample::new((0.0, 0.0), 0.0),
            Sample::new((1.0, 0.0), 8.0),
            Sample::new((0.2, 0.0), 16.0),
        ];
        assert!(is_noisy_reversal(&back_and_forth, 2.0));
        // Same shape, but too long to be noise
        assert!(!is_noisy_reversal(&back_and_forth, 0.5));

        let forward = [
            Sample::new((0.0, 0.0), 0.0),
            Sample::new((1.0, 0.0), 8.0),
            Sample::new((2.0, 0.0), 16.0),
        ];
        assert!(!is_noisy_reversal(&forward, 2.0));
    }

    #[test]
    fn test_reversal_damping_only_on_reversals() {
        let plain = FeaturePolicy {
            augmentation: TrainingAugmentation::Interpolated,
            interpolation_points: 3,
            ..FeaturePolicy::default()
        };
        let damped = FeaturePolicy {
            augmentation: TrainingAugmentation::InterpolatedDampReversals,
            ..plain.clone()
        };

        let run = |policy: &FeaturePolicy, samples: &[Sample]| {
            let mut p = TrainingPipeline::new(&config(5), policy).unwrap();
            for s in samples {
                p.push(*s).unwrap();
            }
            p.network().export_weights()
        };

        // Steady motion: no reversal, both policies train identically
        let steady: Vec<Sample> = (0..7).map(linear).collect();
        assert_eq!(run(&plain, &steady), run(&damped, &steady));

        // Jitter in place: the damped policy trains at a reduced rate
        let jitter: Vec<Sample> = (0..7)
            .map(|i| Sample::new((if i % 2 == 0 { 0.0 } else { 0.5 }, 0.0), i as f64 * 8.0))
            .collect();
        assert_ne!(run(&plain, &jitter), run(&damped, &jitter));
    }

    #[test]
    fn test_sequence_empty_before_ready() {
        let p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        assert!(p.predict_sequence(5, 1.0, None).is_empty());
    }

    #[test]
    fn test_steps_request_stamps_target_time() {
        let mut p = TrainingPipeline::new(&config(1), &FeaturePolicy::default()).unwrap();
        for i in 0..7 {
            p.push(linear(i)).unwrap();
        }
        let req = PredictionRequest {
            target_time: 70.0,
            lookahead: Lookahead::Steps(3),
            gain: 1.0,
        };
        let prediction = p.predict(&req, None);
        assert!(prediction.is_model());
        assert_eq!(prediction.sample.timestamp, 70.0);
    }
}
