//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments
//!
//! Every section is optional in the file; missing fields take their defaults.
//!
//! ```toml
//! [network]
//! hidden_width = 16
//! hidden_depth = 1
//! learning_rate = 0.01
//! history_length = 6
//!
//! [features]
//! features = "deltas_time"
//! self_feeding = true
//! augmentation = "interpolated"
//!
//! [filters]
//! smoother = "one_euro"
//! chatter_threshold = 1.5
//!
//! [lookahead]
//! mode = "timed"
//! max_lookahead = 3.0
//!
//! [upsample]
//! enabled = true
//! target_rate_hz = 500.0
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PredictorError, Result};
use crate::features::{FeaturePolicy, Topology};
use crate::filter::FilterConfig;
use crate::network::NetworkConfig;
use crate::predictor::LookaheadConfig;
use crate::scheduler::UpsampleConfig;

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Points in the snapshot trajectory
    #[serde(default = "default_trajectory_steps")]
    pub trajectory_steps: usize,
}

fn default_trajectory_steps() -> usize {
    8
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            trajectory_steps: default_trajectory_steps(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Network shape and training
    #[serde(default)]
    pub network: NetworkConfig,
    /// Feature composition and augmentation
    #[serde(default)]
    pub features: FeaturePolicy,
    /// Signal conditioning
    #[serde(default)]
    pub filters: FilterConfig,
    /// Lookahead selection
    #[serde(default)]
    pub lookahead: LookaheadConfig,
    /// Background upsampling
    #[serde(default)]
    pub upsample: UpsampleConfig,
    /// Telemetry snapshot
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig =
            toml::from_str(&content).context("Failed to parse config file")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.features.validate()?;
        self.filters.validate()?;
        self.lookahead.validate()?;
        self.upsample.validate()?;
        if self.telemetry.trajectory_steps > 256 {
            return Err(PredictorError::InvalidConfig(format!(
                "trajectory_steps must be <= 256 (got {})",
                self.telemetry.trajectory_steps
            )));
        }
        Ok(())
    }

    /// Network topology described by this configuration
    pub fn topology(&self) -> Topology {
        Topology::from_config(&self.network, &self.features)
    }

    /// Apply CLI overrides
    pub fn with_overrides(mut self, rate_hz: Option<f64>, seed: Option<u64>) -> Self {
        if let Some(rate) = rate_hz {
            self.upsample.target_rate_hz = rate;
            self.upsample.enabled = true;
        }
        if seed.is_some() {
            self.network.seed = seed;
        }
        self
    }
}
