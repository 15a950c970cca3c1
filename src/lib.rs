//! # lamco-motion-predictor
//!
//! Online-learning motion predictor. Consumes a live stream of timestamped 2D
//! positions, continuously trains a small MLP on the most recent movement and
//! extrapolates near-future positions, optionally upsampled to a fixed rate by
//! a background thread.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!   ├─> SignalConditioner (chatter suppression + One Euro / latency-budget EMA)
//!   ├─> TrainingPipeline
//!   │     ├─> SlidingWindow (history_length + 1 raw samples)
//!   │     ├─> FeatureLayout (deltas, absolute positions, time gaps)
//!   │     ├─> Network (tanh MLP, clipped online SGD)
//!   │     └─> MotionEstimator (speed / interval EMAs for lookahead)
//!   ├─> Predictor (single-step, recursive, sequence)
//!   └─> UpsampleScheduler (fixed-rate thread, try_lock, cancellable pacing)
//! ```
//!
//! # Data Flow
//!
//! **Producer path:** raw sample → conditioners → window → training step →
//! (hybrid) raw emission
//!
//! **Scheduler path:** tick → predict at `last_raw + elapsed + offset` →
//! predicted emission
//!
//! # Example
//!
//! ```no_run
//! use lamco_motion_predictor::{Emission, Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default(), |e: Emission| {
//!     println!("{:?} -> {:?}", e.source, e.position);
//! })?;
//!
//! for i in 0..20 {
//!     engine.consume_sample((i as f64 * 4.0, 100.0), i as f64 * 8.0)?;
//! }
//! let prediction = engine.predict(20.0 * 8.0);
//! println!("next: {:?}", prediction.position());
//! # Ok::<(), lamco_motion_predictor::PredictorError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Engine configuration
pub mod config;

/// Engine, output sink and emissions
pub mod engine;

/// Error types and recovery policy
pub mod error;

/// Sliding window, feature layout and online training
pub mod features;

/// Chatter suppression and adaptive smoothing
pub mod filter;

/// Feed-forward network with clipped SGD
pub mod network;

/// Prediction, lookahead and motion estimation
pub mod predictor;

/// Recorded and synthetic motion traces
pub mod replay;

/// Raw and predicted samples
pub mod sample;

/// Fixed-rate upsample thread
pub mod scheduler;

/// Telemetry snapshot
pub mod telemetry;

pub use config::{EngineConfig, TelemetryConfig};
pub use engine::{Emission, EmissionSource, Engine, NullSink, OutputSink};
pub use error::{PredictorError, Result};
pub use predictor::{Lookahead, LookaheadMode, Prediction, PredictionKind, PredictionRequest};
pub use sample::{Position, Sample};
pub use scheduler::{SchedulerState, TickOutcome};
pub use telemetry::TelemetrySnapshot;
