//! Upsample Scheduler
//!
//! Fixed-rate background loop that asks the engine for a prediction on every
//! tick, independent of the irregular raw-sample rate.
//!
//! # Threading Model
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────────┐
//! │ Producer                 │        │ upsample thread              │
//! │                          │        │                              │
//! │ consume_sample()         │        │ loop {                       │
//! │   state.lock()  ◄────────┼─ lock ─┼─►  state.try_lock() or skip  │
//! │                          │        │    predict + emit            │
//! │ Engine::drop()           │        │    pace to next deadline ◄───┼── shutdown
//! │   drop shutdown_tx ──────┼────────┼─►  (recv_timeout wakes)      │
//! │   join()                 │        │ }                            │
//! └──────────────────────────┘        └──────────────────────────────┘
//! ```
//!
//! # Pacing
//!
//! Deadlines come from `Instant`. The coarse part of the wait is a
//! `recv_timeout` on the shutdown channel, so teardown wakes the thread
//! immediately. The last `spin_window_us` before the deadline are spent in
//! `yield_now`, which bounds jitter at sub-millisecond intervals.
//!
//! After a stall the loop replays at most `max_catch_up_ticks` missed ticks;
//! beyond that the schedule re-anchors to the current time.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

use crate::error::{PredictorError, Result};

/// Throughput counter reset interval
pub const THROUGHPUT_WINDOW: Duration = Duration::from_millis(500);

/// Highest accepted emission rate
pub const MAX_RATE_HZ: f64 = 2000.0;

/// Upsample scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsampleConfig {
    /// Run the background scheduler
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Target emission rate (Hz)
    #[serde(default = "default_target_rate_hz")]
    pub target_rate_hz: f64,

    /// Emit conditioned raw samples immediately as they arrive
    #[serde(default = "default_hybrid")]
    pub hybrid: bool,

    /// Raw input older than this (ms) puts the scheduler to Idle
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: f64,

    /// Added to the prediction target time (ms)
    #[serde(default = "default_offset_ms")]
    pub offset_ms: f64,

    /// Missed ticks replayed after a stall before re-anchoring
    #[serde(default = "default_max_catch_up_ticks")]
    pub max_catch_up_ticks: u32,

    /// Spin/yield window before each deadline (µs)
    #[serde(default = "default_spin_window_us")]
    pub spin_window_us: u64,
}

fn default_enabled() -> bool {
    false
}
fn default_target_rate_hz() -> f64 {
    240.0
}
fn default_hybrid() -> bool {
    true
}
fn default_staleness_ms() -> f64 {
    100.0
}
fn default_offset_ms() -> f64 {
    0.0
}
fn default_max_catch_up_ticks() -> u32 {
    2
}
fn default_spin_window_us() -> u64 {
    200
}

impl Default for UpsampleConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            target_rate_hz: default_target_rate_hz(),
            hybrid: default_hybrid(),
            staleness_ms: default_staleness_ms(),
            offset_ms: default_offset_ms(),
            max_catch_up_ticks: default_max_catch_up_ticks(),
            spin_window_us: default_spin_window_us(),
        }
    }
}

impl UpsampleConfig {
    /// Validate ranges
    pub fn validate(&self) -> Result<()> {
        if !self.target_rate_hz.is_finite()
            || self.target_rate_hz <= 0.0
            || self.target_rate_hz > MAX_RATE_HZ
        {
            return Err(PredictorError::InvalidConfig(format!(
                "target_rate_hz must be in (0, {}] (got {})",
                MAX_RATE_HZ, self.target_rate_hz
            )));
        }
        if !self.staleness_ms.is_finite() || self.staleness_ms <= 0.0 {
            return Err(PredictorError::InvalidConfig(format!(
                "staleness_ms must be positive (got {})",
                self.staleness_ms
            )));
        }
        if !self.offset_ms.is_finite() {
            return Err(PredictorError::InvalidConfig(
                "offset_ms must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Tick interval for the target rate
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_rate_hz)
    }
}

/// Scheduler activity state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SchedulerState {
    /// No fresh input, model not ready, or scheduler stopped
    Idle = 0,
    /// Emitting predictions at the target rate
    Producing = 1,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Producing,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Producing => write!(f, "producing"),
        }
    }
}

/// Why a tick produced nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// Upsampling switched off in the configuration
    Disabled,
    /// Window not yet full
    NotReady,
    /// No raw sample within the staleness window
    Stale,
    /// Hybrid pass-through already emitted within this tick interval
    RecentEmission,
    /// Prediction was not finite
    NonFinite,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A prediction was emitted
    Emitted,
    /// Nothing to emit
    Idle(IdleReason),
    /// State lock was busy; tick skipped
    Contended,
}

/// Work performed on every tick
pub trait TickHandler: Send + Sync {
    /// Run one tick at `now`
    fn tick(&self, now: Instant) -> TickOutcome;
}

/// Emissions per second over a rolling 500 ms window
#[derive(Debug, Clone)]
pub struct ThroughputCounter {
    window_start: Instant,
    count: u64,
    rate_hz: f64,
}

impl ThroughputCounter {
    /// Start counting at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            rate_hz: 0.0,
        }
    }

    /// Count one emission
    pub fn record(&mut self) {
        self.count += 1;
    }

    /// Publish a new rate once the window has elapsed
    ///
    /// Returns the new rate when the window rolled over.
    pub fn roll(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < THROUGHPUT_WINDOW {
            return None;
        }
        self.rate_hz = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.window_start = now;
        Some(self.rate_hz)
    }

    /// Last published rate
    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }
}

/// Runtime knobs and telemetry shared between the engine and the thread
///
/// Everything is atomic so that neither side ever waits on the other.
#[derive(Debug)]
pub struct SchedulerControl {
    rate_hz_bits: AtomicU64,
    max_catch_up_ticks: AtomicU32,
    spin_window_us: AtomicU64,
    ticks: AtomicU64,
    throughput_bits: AtomicU64,
    state: AtomicU8,
    running: AtomicBool,
}

impl SchedulerControl {
    /// Control block initialised from `config`
    pub fn new(config: &UpsampleConfig) -> Self {
        let control = Self {
            rate_hz_bits: AtomicU64::new(0),
            max_catch_up_ticks: AtomicU32::new(0),
            spin_window_us: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            throughput_bits: AtomicU64::new(0f64.to_bits()),
            state: AtomicU8::new(SchedulerState::Idle as u8),
            running: AtomicBool::new(false),
        };
        control.apply(config);
        control
    }

    /// Publish new pacing parameters; the thread picks them up next tick
    pub fn apply(&self, config: &UpsampleConfig) {
        self.rate_hz_bits
            .store(config.target_rate_hz.to_bits(), Ordering::Relaxed);
        self.max_catch_up_ticks
            .store(config.max_catch_up_ticks, Ordering::Relaxed);
        self.spin_window_us
            .store(config.spin_window_us, Ordering::Relaxed);
    }

    /// Current tick interval
    pub fn interval(&self) -> Duration {
        let rate = f64::from_bits(self.rate_hz_bits.load(Ordering::Relaxed));
        if rate > 0.0 && rate.is_finite() {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::from_secs_f64(1.0 / default_target_rate_hz())
        }
    }

    fn spin_window(&self) -> Duration {
        Duration::from_micros(self.spin_window_us.load(Ordering::Relaxed))
    }

    fn max_catch_up(&self) -> u32 {
        self.max_catch_up_ticks.load(Ordering::Relaxed)
    }

    /// Ticks run since the control block was created
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Last published emissions per second
    pub fn throughput_hz(&self) -> f64 {
        f64::from_bits(self.throughput_bits.load(Ordering::Relaxed))
    }

    /// Current activity state
    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// True while a scheduler thread is alive
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn set_throughput(&self, rate_hz: f64) {
        self.throughput_bits
            .store(rate_hz.to_bits(), Ordering::Relaxed);
    }
}

/// Handle to the running upsample thread
///
/// Dropping the handle stops and joins the thread.
pub struct UpsampleScheduler {
    /// Thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Dropping or sending on this wakes the pacing wait
    shutdown_tx: Option<Sender<()>>,

    control: Arc<SchedulerControl>,
}

impl UpsampleScheduler {
    /// Start the upsample thread
    ///
    /// # Errors
    ///
    /// Returns error if thread creation fails
    pub fn spawn<H>(handler: Arc<H>, control: Arc<SchedulerControl>) -> Result<Self>
    where
        H: TickHandler + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_control = Arc::clone(&control);

        control.running.store(true, Ordering::Release);
        let thread_handle = thread::Builder::new()
            .name("motion-upsample".to_string())
            .spawn(move || {
                run_upsample_loop(handler.as_ref(), &thread_control, &shutdown_rx);
                thread_control.set_state(SchedulerState::Idle);
                thread_control.running.store(false, Ordering::Release);
            })
            .map_err(|e| {
                control.running.store(false, Ordering::Release);
                PredictorError::SchedulerSpawnFailed(e.to_string())
            })?;

        info!(
            "Upsample scheduler started at {:.1} Hz",
            1.0 / control.interval().as_secs_f64()
        );

        Ok(Self {
            thread_handle: Some(thread_handle),
            shutdown_tx: Some(shutdown_tx),
            control,
        })
    }

    /// Shared control block
    pub fn control(&self) -> &Arc<SchedulerControl> {
        &self.control
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(&mut self) -> Result<()> {
        // Disconnecting the channel cancels the pacing wait
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
            drop(tx);
        }

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Upsample thread panicked during shutdown");
                return Err(PredictorError::SchedulerPanicked);
            }
            info!("Upsample scheduler stopped");
        }

        Ok(())
    }
}

impl Drop for UpsampleScheduler {
    fn drop(&mut self) {
        debug!("Dropping UpsampleScheduler");
        let _ = self.shutdown();
    }
}

/// Pacing wait result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Deadline reached
    Deadline,
    /// Shutdown requested
    Cancelled,
}

/// Wait until `deadline`, waking early on shutdown
///
/// Blocks on the channel until `spin_window` before the deadline, then
/// yields until the deadline passes.
pub fn pace_until(deadline: Instant, shutdown_rx: &Receiver<()>, spin_window: Duration) -> Pace {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Pace::Deadline;
        }

        let remaining = deadline - now;
        if remaining > spin_window {
            match shutdown_rx.recv_timeout(remaining - spin_window) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Pace::Cancelled,
            }
        }

        match shutdown_rx.try_recv() {
            Err(TryRecvError::Empty) => thread::yield_now(),
            Ok(()) | Err(TryRecvError::Disconnected) => return Pace::Cancelled,
        }
    }
}

/// Deadline after `deadline`, capping how many missed ticks are replayed
pub fn next_deadline(deadline: Instant, interval: Duration, now: Instant, max_catch_up: u32) -> Instant {
    let next = deadline + interval;
    if now <= next {
        return next;
    }

    let behind = now - next;
    let missed = behind.as_nanos() / interval.as_nanos().max(1);
    if missed >= u128::from(max_catch_up) {
        trace!("Re-anchoring schedule after {} missed ticks", missed);
        now
    } else {
        next
    }
}

fn run_upsample_loop<H: TickHandler + ?Sized>(
    handler: &H,
    control: &SchedulerControl,
    shutdown_rx: &Receiver<()>,
) {
    debug!("Upsample loop started");

    let mut state = SchedulerState::Idle;
    let mut counter = ThroughputCounter::new(Instant::now());
    let mut deadline = Instant::now() + control.interval();

    loop {
        if pace_until(deadline, shutdown_rx, control.spin_window()) == Pace::Cancelled {
            break;
        }

        let now = Instant::now();
        let outcome = handler.tick(now);
        control.ticks.fetch_add(1, Ordering::Relaxed);

        let next_state = match outcome {
            TickOutcome::Emitted => {
                counter.record();
                SchedulerState::Producing
            }
            TickOutcome::Idle(reason) => {
                trace!("Tick idle: {:?}", reason);
                SchedulerState::Idle
            }
            // Contention says nothing about input; keep the current state
            TickOutcome::Contended => state,
        };

        if next_state != state {
            debug!("Upsample scheduler {} -> {}", state, next_state);
            state = next_state;
            control.set_state(state);
        }

        if let Some(rate) = counter.roll(now) {
            control.set_throughput(rate);
        }

        deadline = next_deadline(deadline, control.interval(), Instant::now(), control.max_catch_up());
    }

    debug!("Upsample loop exited");
}
