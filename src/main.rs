//! lamco-motion-predictor - trace replay harness
//!
//! Replays a recorded or synthetic motion trace through the engine in real
//! time and reports emissions and final telemetry as JSON on stdout. Logs go
//! to stderr (and optionally a file) so stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_motion_predictor::replay::{load_trace, SyntheticPath};
use lamco_motion_predictor::{Emission, EmissionSource, Engine, EngineConfig, TelemetrySnapshot};

/// Command-line arguments for lamco-motion-predictor
#[derive(Parser, Debug)]
#[command(name = "lamco-motion-predictor")]
#[command(version, about = "Online-learning motion predictor (trace replay)", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "LAMCO_PREDICTOR_CONFIG")]
    pub config: Option<String>,

    /// Recorded trace (CSV lines of x,y,t_ms)
    #[arg(short, long, conflicts_with = "synthetic")]
    pub trace: Option<String>,

    /// Synthetic path (circle|line|zigzag)
    #[arg(short, long, default_value = "circle")]
    pub synthetic: SyntheticPath,

    /// Synthetic trace length (ms)
    #[arg(long, default_value = "2000")]
    pub duration_ms: f64,

    /// Synthetic raw sample interval (ms)
    #[arg(long, default_value = "8")]
    pub sample_interval_ms: f64,

    /// Enable upsampling at this rate (Hz)
    #[arg(short, long)]
    pub rate_hz: Option<f64>,

    /// Fixed weight-initialisation seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print every emission as a JSON line
    #[arg(long)]
    pub emissions: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "compact")]
    pub log_format: String,

    /// Write logs to file (in addition to stderr)
    #[arg(long)]
    pub log_file: Option<String>,
}

/// Final report printed after the replay
#[derive(Debug, Serialize)]
struct ReplayReport {
    samples: usize,
    raw_emissions: u64,
    predicted_emissions: u64,
    elapsed_ms: f64,
    snapshot: Option<TelemetrySnapshot>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; the guard flushes the file writer on exit
    let _log_guard = init_logging(&args)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-motion-predictor v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {}", env!("BUILD_DATE"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    // Load configuration
    let config = match &args.config {
        Some(path) => EngineConfig::load(path).unwrap_or_else(|e| {
            warn!("Failed to load config: {:#}, using defaults", e);
            EngineConfig::default()
        }),
        None => EngineConfig::default(),
    };

    // Override config with CLI args
    let config = config.with_overrides(args.rate_hz, args.seed);
    config.validate().context("Invalid configuration after CLI overrides")?;
    debug!("Config: {:?}", config);

    let samples = match &args.trace {
        Some(path) => load_trace(path)?,
        None => args
            .synthetic
            .samples(args.duration_ms, args.sample_interval_ms),
    };
    info!("Replaying {} samples", samples.len());

    // Printing happens off the engine lock on a consumer thread
    let (tx, rx) = bounded::<Emission>(4096);
    let print_emissions = args.emissions;
    let printer = thread::Builder::new()
        .name("emission-printer".to_string())
        .spawn(move || {
            let mut raw = 0u64;
            let mut predicted = 0u64;
            for emission in rx {
                match emission.source {
                    EmissionSource::Raw => raw += 1,
                    EmissionSource::Predicted => predicted += 1,
                }
                if print_emissions {
                    if let Ok(line) = serde_json::to_string(&emission) {
                        println!("{}", line);
                    }
                }
            }
            (raw, predicted)
        })
        .context("Failed to spawn emission printer")?;

    let engine = Engine::new(config, tx).context("Failed to create engine")?;

    let start = Instant::now();
    let t0 = samples.first().map(|s| s.timestamp).unwrap_or(0.0);
    for sample in &samples {
        let due = Duration::from_secs_f64(((sample.timestamp - t0) / 1000.0).max(0.0));
        if let Some(wait) = due.checked_sub(start.elapsed()) {
            thread::sleep(wait);
        }

        // Host clock: replay elapsed time, so scheduler targets line up
        let now_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Err(e) = engine.consume_sample(sample.position, now_ms) {
            warn!("Sample rejected: {}", e);
        }
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let snapshot = engine.snapshot();
    info!(
        "Replay finished: iterations={} throughput={:.1}Hz ticks={}",
        engine.iterations(),
        engine.throughput_hz(),
        engine.scheduler_ticks()
    );

    // Dropping the engine joins the scheduler and closes the channel
    drop(engine);
    let (raw_emissions, predicted_emissions) = printer
        .join()
        .map_err(|_| anyhow::anyhow!("Emission printer panicked"))?;

    let report = ReplayReport {
        samples: samples.len(),
        raw_emissions,
        predicted_emissions,
        elapsed_ms,
        snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_motion_predictor={level},warn",
            level = log_level
        ))
    });

    // If log file is specified, write to both stderr and file
    if let Some(log_file_path) = &args.log_file {
        let file = std::fs::File::create(log_file_path)
            .with_context(|| format!("Failed to create log file: {}", log_file_path))?;
        let (file_writer, guard) = tracing_appender::non_blocking(file);

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stderr),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(file_writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stderr),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(file_writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stderr),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(file_writer)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
        Ok(Some(guard))
    } else {
        // Stderr only
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
                    .init();
            }
        }
        Ok(None)
    }
}
