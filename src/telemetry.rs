//! Telemetry snapshot
//!
//! Point-in-time view of the engine for introspection. Serialisable so a host
//! can ship it anywhere; the crate itself does no transport.

use serde::Serialize;

use crate::sample::{Position, Sample};
use crate::scheduler::SchedulerState;

/// Engine state at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Window full and network trained at least once
    pub ready: bool,
    /// Training steps on the current network
    pub iterations: u64,
    /// Network layer widths
    pub layer_sizes: Vec<usize>,
    /// Weights plus biases
    pub parameter_count: usize,
    /// Loss of the most recent real training step
    pub last_loss: Option<f64>,
    /// Smoothed speed (units/ms)
    pub speed: f64,
    /// Smoothed raw-sample interval (ms)
    pub mean_interval_ms: f64,
    /// Samples currently in the window
    pub window_len: usize,
    /// Newest conditioned raw sample
    pub last_raw: Option<Sample>,
    /// Cached self-feeding prediction
    pub last_predicted: Option<Sample>,
    /// Upsample emissions per second
    pub throughput_hz: f64,
    /// Scheduler ticks since start
    pub scheduler_ticks: u64,
    /// Scheduler activity
    pub scheduler_state: SchedulerState,
    /// Short recursive extrapolation from the current history
    pub trajectory: Vec<Position>,
}

impl TelemetrySnapshot {
    /// Render as a single JSON line
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
