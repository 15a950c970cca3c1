//! Prediction engine
//!
//! One owning object behind one lock. The producer path
//! ([`Engine::consume_sample`]) and the upsample thread share the window,
//! network and filters; every mutation and every emission happens under
//! `Shared::state`.
//!
//! # Locking
//!
//! | Caller | Acquire | On contention |
//! |--------|---------|---------------|
//! | `consume_sample`, `configure`, `predict*` | `lock()` | waits |
//! | upsample tick | `try_lock()` | skips the tick |
//! | `layer_sizes`, `export_weights`, `snapshot` | `try_lock()` | returns `None` |
//!
//! Readiness, iteration count and scheduler counters are mirrored into
//! atomics, so those reads never touch the lock.

mod sink;

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{recovery_action, PredictorError, RecoveryAction, Result};
use crate::features::TrainingPipeline;
use crate::filter::SignalConditioner;
use crate::predictor::{Lookahead, Prediction, PredictionRequest};
use crate::sample::{PredictedSample, Sample};
use crate::scheduler::{
    IdleReason, SchedulerControl, SchedulerState, TickHandler, TickOutcome, UpsampleScheduler,
};
use crate::telemetry::TelemetrySnapshot;

#[cfg(test)]
pub use sink::MockOutputSink;
pub use sink::{Emission, EmissionSource, NullSink, OutputSink};

/// Everything guarded by the engine lock
struct EngineState {
    config: EngineConfig,
    conditioner: SignalConditioner,
    pipeline: TrainingPipeline,
    /// Cleared on every raw sample
    last_predicted: Option<PredictedSample>,
    /// Newest conditioned raw sample and its arrival instant
    last_raw: Option<(Sample, Instant)>,
    /// Arrival instant of the last hybrid pass-through
    last_passthrough: Option<Instant>,
}

impl EngineState {
    fn new(config: EngineConfig) -> Result<Self> {
        let pipeline = TrainingPipeline::new(&config.network, &config.features)?;
        Ok(Self {
            conditioner: SignalConditioner::new(&config.filters),
            pipeline,
            config,
            last_predicted: None,
            last_raw: None,
            last_passthrough: None,
        })
    }

    /// Newest point of the prediction history
    fn prediction_base(&self) -> Option<Sample> {
        match self.last_predicted {
            Some(predicted) if self.config.features.self_feeding => Some(*predicted.sample()),
            _ => self.pipeline.window().latest().copied(),
        }
    }

    fn request(&self, target_time: f64) -> PredictionRequest {
        let base_timestamp = self
            .prediction_base()
            .map(|s| s.timestamp)
            .unwrap_or(target_time);
        PredictionRequest {
            target_time,
            lookahead: self.config.lookahead.resolve(
                target_time,
                base_timestamp,
                self.pipeline.motion(),
            ),
            gain: self.config.lookahead.gain,
        }
    }

    fn predict(&self, request: &PredictionRequest) -> Prediction {
        self.pipeline.predict(request, self.last_predicted.as_ref())
    }
}

/// State shared with the upsample thread
struct Shared {
    state: Mutex<EngineState>,
    sink: Box<dyn OutputSink>,
    ready: AtomicBool,
    iterations: AtomicU64,
    control: Arc<SchedulerControl>,
}

impl Shared {
    fn publish(&self, state: &EngineState) {
        self.ready
            .store(state.pipeline.is_ready(), Ordering::Relaxed);
        self.iterations
            .store(state.pipeline.network().iterations(), Ordering::Relaxed);
    }

    /// Lock without waiting
    fn try_state(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state.try_lock().ok_or(PredictorError::Contended)
    }

    /// Apply the recovery policy for a training-path error
    fn recover(&self, state: &mut EngineState, err: PredictorError) {
        match recovery_action(&err) {
            RecoveryAction::RebuildNetwork => {
                warn!("{}; rebuilding network", err);
                state.last_predicted = None;
                if let Err(e) = state.pipeline.reset_network() {
                    error!("Network rebuild failed: {}", e);
                }
            }
            RecoveryAction::SkipSample => {
                warn!("Skipping training step: {}; discarding buffered history", err);
                state.last_predicted = None;
                state.pipeline.clear_history();
            }
            RecoveryAction::FallBackToLastPosition => {
                debug!("{}; predictions fall back to the last position", err);
                state.last_predicted = None;
            }
            RecoveryAction::Reject => {
                error!("Training step rejected: {}", err);
            }
            RecoveryAction::SkipTick => {
                trace!("{}", err);
            }
        }
    }
}

/// Outcome reported for a tick that could not run
fn skipped_tick(err: PredictorError) -> TickOutcome {
    let action = recovery_action(&err);
    trace!("Tick skipped ({:?}): {}", action, err);
    match action {
        RecoveryAction::SkipTick => TickOutcome::Contended,
        RecoveryAction::RebuildNetwork => TickOutcome::Idle(IdleReason::NonFinite),
        RecoveryAction::FallBackToLastPosition
        | RecoveryAction::SkipSample
        | RecoveryAction::Reject => TickOutcome::Idle(IdleReason::NotReady),
    }
}

impl TickHandler for Shared {
    fn tick(&self, now: Instant) -> TickOutcome {
        let mut state = match self.try_state() {
            Ok(state) => state,
            Err(e) => return skipped_tick(e),
        };

        let upsample = &state.config.upsample;
        if !upsample.enabled {
            return TickOutcome::Idle(IdleReason::Disabled);
        }
        if let Err(e) = state.pipeline.check_ready() {
            return skipped_tick(e);
        }
        let Some((last_raw, arrived)) = state.last_raw else {
            return TickOutcome::Idle(IdleReason::NotReady);
        };

        let since_arrival_ms = now.saturating_duration_since(arrived).as_secs_f64() * 1000.0;
        if since_arrival_ms > upsample.staleness_ms {
            return TickOutcome::Idle(IdleReason::Stale);
        }
        if upsample.hybrid {
            if let Some(passthrough) = state.last_passthrough {
                if now.saturating_duration_since(passthrough) < upsample.interval() {
                    return TickOutcome::Idle(IdleReason::RecentEmission);
                }
            }
        }

        let target_time = last_raw.timestamp + since_arrival_ms + upsample.offset_ms;
        let request = state.request(target_time);
        let prediction = state.predict(&request);
        if !prediction.is_model() || !prediction.sample.is_finite() {
            return TickOutcome::Idle(IdleReason::NonFinite);
        }

        self.sink.emit(Emission {
            position: prediction.position(),
            timestamp: target_time,
            source: EmissionSource::Predicted,
        });

        if state.config.features.self_feeding {
            state.last_predicted = Some(PredictedSample::new(prediction.sample));
        }

        trace!(
            "Tick emitted ({:.2}, {:.2}) @ {:.2}ms",
            prediction.position().0,
            prediction.position().1,
            target_time
        );
        TickOutcome::Emitted
    }
}

/// Online-learning motion predictor
///
/// All methods take `&self`; the engine can be shared across threads behind
/// an `Arc`. Dropping the engine stops and joins the upsample thread.
pub struct Engine {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<UpsampleScheduler>>,
    /// Serialises `configure` calls so off-lock rebuilds cannot race
    configure_lock: Mutex<()>,
}

impl Engine {
    /// Create an engine and start the scheduler if enabled
    pub fn new(config: EngineConfig, sink: impl OutputSink + 'static) -> Result<Self> {
        config.validate()?;

        let control = Arc::new(SchedulerControl::new(&config.upsample));
        let upsample_enabled = config.upsample.enabled;
        let state = EngineState::new(config)?;

        info!(
            "Motion engine created: layers={:?}",
            state.pipeline.network().layer_sizes()
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            sink: Box::new(sink),
            ready: AtomicBool::new(false),
            iterations: AtomicU64::new(0),
            control,
        });

        let engine = Self {
            shared,
            scheduler: Mutex::new(None),
            configure_lock: Mutex::new(()),
        };

        if upsample_enabled {
            engine.start_scheduler()?;
        }

        Ok(engine)
    }

    /// Feed one raw sample
    ///
    /// Conditions it, appends it to the window, trains, and in hybrid mode
    /// emits the conditioned position immediately. A sample whose training
    /// step fails is not emitted.
    pub fn consume_sample(&self, position: (f64, f64), timestamp: f64) -> Result<()> {
        let raw = Sample::new(position, timestamp);
        if !raw.is_finite() {
            warn!("Rejecting non-finite sample ({}, {}) @ {}", position.0, position.1, timestamp);
            return Err(PredictorError::InvalidSample(position.0, position.1));
        }

        let now = Instant::now();
        let mut state = self.shared.state.lock();

        let mut sample = state.conditioner.condition(raw);
        if !sample.is_finite() {
            warn!(
                "Filters overflowed at ({}, {}); resetting and passing raw input",
                position.0, position.1
            );
            state.conditioner.reset();
            sample = state.conditioner.condition(raw);
        }
        state.last_predicted = None;

        match state.pipeline.push(sample) {
            Ok(Some(loss)) => trace!("Trained on sample: loss={:.6}", loss),
            Ok(None) => {}
            Err(e) => {
                self.shared.recover(&mut state, e);
                self.shared.publish(&state);
                return Ok(());
            }
        }

        state.last_raw = Some((sample, now));
        self.shared.publish(&state);

        if state.config.upsample.hybrid {
            self.shared.sink.emit(Emission {
                position: sample.position,
                timestamp: sample.timestamp,
                source: EmissionSource::Raw,
            });
            state.last_passthrough = Some(now);
        }

        Ok(())
    }

    /// Replace the configuration
    ///
    /// Invalid configurations are rejected with no partial application. A
    /// topology change builds the new network outside the lock and swaps it
    /// in; filter changes rebuild the conditioners; scheduler changes apply
    /// from the next tick.
    pub fn configure(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.configure_lock.lock();

        let topology = config.topology();
        let current = self.shared.state.lock().pipeline.topology().clone();

        let rebuilt = if topology != current {
            Some(topology.build_network(config.network.seed)?)
        } else {
            None
        };

        {
            let mut state = self.shared.state.lock();

            if let Some(network) = rebuilt {
                state.pipeline.rebuild(topology, network)?;
                state.last_predicted = None;
            }
            state
                .pipeline
                .set_training(config.network.learning_rate, config.network.seed);

            if config.filters != state.config.filters {
                debug!("Filter configuration changed; rebuilding conditioners");
                state.conditioner = SignalConditioner::new(&config.filters);
            }

            state.config = config.clone();
            self.shared.publish(&state);
        }

        self.shared.control.apply(&config.upsample);
        debug!("Configuration applied");

        let running = self.shared.control.is_running();
        if config.upsample.enabled && !running {
            self.start_scheduler()?;
        } else if !config.upsample.enabled && running {
            self.stop_scheduler()?;
        }

        Ok(())
    }

    /// Edit the current configuration in place and apply it
    pub fn update_config<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut config = self.config();
        edit(&mut config);
        self.configure(config)
    }

    /// Current configuration
    pub fn config(&self) -> EngineConfig {
        self.shared.state.lock().config.clone()
    }

    /// Predict the position at `target_time` using the configured lookahead
    pub fn predict(&self, target_time: f64) -> Prediction {
        let state = self.shared.state.lock();
        let request = state.request(target_time);
        state.predict(&request)
    }

    /// Recursive `steps`-ahead prediction
    ///
    /// The target time is `steps` mean intervals after the newest history
    /// point.
    pub fn predict_steps(&self, steps: usize) -> Prediction {
        let state = self.shared.state.lock();
        let base = state.prediction_base().map(|s| s.timestamp).unwrap_or(0.0);
        let target_time = base + steps as f64 * state.pipeline.motion().mean_interval();
        state.predict(&PredictionRequest {
            target_time,
            lookahead: Lookahead::Steps(steps),
            gain: state.config.lookahead.gain,
        })
    }

    /// Every intermediate point of a `steps`-long recursive prediction
    pub fn predict_sequence(&self, steps: usize) -> Vec<Sample> {
        let state = self.shared.state.lock();
        state.pipeline.predict_sequence(
            steps,
            state.config.lookahead.gain,
            state.last_predicted.as_ref(),
        )
    }

    /// Run one scheduler tick on the calling thread
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick(Instant::now())
    }

    /// Start the upsample thread if it is not running
    pub fn start_scheduler(&self) -> Result<()> {
        let mut slot = self.scheduler.lock();
        if slot.as_ref().is_some_and(|s| s.control().is_running()) {
            return Ok(());
        }
        let handler = Arc::clone(&self.shared);
        *slot = Some(UpsampleScheduler::spawn(
            handler,
            Arc::clone(&self.shared.control),
        )?);
        Ok(())
    }

    /// Stop and join the upsample thread
    pub fn stop_scheduler(&self) -> Result<()> {
        let scheduler = self.scheduler.lock().take();
        match scheduler {
            Some(mut scheduler) => scheduler.shutdown(),
            None => Ok(()),
        }
    }

    /// Window full and network training
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Relaxed)
    }

    /// Training steps on the current network
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::Relaxed)
    }

    /// Upsample emissions per second
    pub fn throughput_hz(&self) -> f64 {
        self.shared.control.throughput_hz()
    }

    /// Scheduler ticks since the engine was created
    pub fn scheduler_ticks(&self) -> u64 {
        self.shared.control.ticks()
    }

    /// Scheduler activity
    pub fn scheduler_state(&self) -> SchedulerState {
        self.shared.control.state()
    }

    /// True while the upsample thread is alive
    pub fn is_scheduler_running(&self) -> bool {
        self.shared.control.is_running()
    }

    /// Network layer widths, or `None` if the engine is busy
    pub fn layer_sizes(&self) -> Option<Vec<usize>> {
        let state = self.shared.try_state().ok()?;
        Some(state.pipeline.network().layer_sizes().to_vec())
    }

    /// Flattened weights, or `None` if the engine is busy
    pub fn export_weights(&self) -> Option<Vec<f64>> {
        let state = self.shared.try_state().ok()?;
        Some(state.pipeline.network().export_weights())
    }

    /// Full telemetry snapshot, or `None` if the engine is busy
    pub fn snapshot(&self) -> Option<TelemetrySnapshot> {
        let state = self.shared.try_state().ok()?;
        let network = state.pipeline.network();
        let motion = state.pipeline.motion();

        let trajectory = state
            .pipeline
            .predict_sequence(
                state.config.telemetry.trajectory_steps,
                state.config.lookahead.gain,
                state.last_predicted.as_ref(),
            )
            .into_iter()
            .map(|s| s.position)
            .collect();

        Some(TelemetrySnapshot {
            ready: state.pipeline.is_ready(),
            iterations: network.iterations(),
            layer_sizes: network.layer_sizes().to_vec(),
            parameter_count: network.export_weights().len() + network.export_biases().len(),
            last_loss: state.pipeline.last_loss(),
            speed: motion.speed(),
            mean_interval_ms: motion.mean_interval(),
            window_len: state.pipeline.window().len(),
            last_raw: state.last_raw.map(|(s, _)| s),
            last_predicted: state.last_predicted.map(|p| *p.sample()),
            throughput_hz: self.throughput_hz(),
            scheduler_ticks: self.scheduler_ticks(),
            scheduler_state: self.scheduler_state(),
            trajectory,
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        debug!("Dropping Engine");
        if let Err(e) = self.stop_scheduler() {
            error!("Scheduler shutdown failed: {}", e);
        }
    }
}
