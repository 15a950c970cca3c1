//! Predictor Error Types
//!
//! Error taxonomy for the prediction core plus the recovery policy the engine
//! applies to each class. No error here is fatal: the worst case is "stop
//! predicting, pass through raw input".

use thiserror::Error;

/// Result type for predictor operations
pub type Result<T> = std::result::Result<T, PredictorError>;

/// Predictor error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictorError {
    /// Layer list rejected at network construction
    #[error("Invalid network topology: {0}")]
    InvalidTopology(String),

    /// Input vector length does not match the first layer width
    #[error("Feature vector size mismatch: expected {expected}, got {actual}")]
    FeatureSizeMismatch {
        /// Width of the network input layer
        expected: usize,
        /// Length of the supplied vector
        actual: usize,
    },

    /// Target vector length does not match the output layer width
    #[error("Target size mismatch: expected {expected}, got {actual}")]
    TargetSizeMismatch {
        /// Width of the network output layer
        expected: usize,
        /// Length of the supplied vector
        actual: usize,
    },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raw sample carried a non-finite coordinate or timestamp
    #[error("Invalid sample: ({0}, {1})")]
    InvalidSample(f64, f64),

    /// Training input or target contained NaN/Infinity
    #[error("Non-finite training data")]
    NonFiniteInput,

    /// A parameter became non-finite after an update
    #[error("Numerical divergence after {iterations} training iterations")]
    NumericalDivergence {
        /// Iteration count at which divergence was detected
        iterations: u64,
    },

    /// Window does not yet hold enough samples
    #[error("Insufficient history: have {have} samples, need {need}")]
    InsufficientHistory {
        /// Samples currently held
        have: usize,
        /// Samples required
        need: usize,
    },

    /// Engine lock held by the other execution context
    #[error("Engine state is busy")]
    Contended,

    /// Upsample thread could not be started
    #[error("Scheduler thread spawn failed: {0}")]
    SchedulerSpawnFailed(String),

    /// Upsample thread panicked before it could be joined
    #[error("Scheduler thread panicked")]
    SchedulerPanicked,
}

/// Error classification for recovery strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Rejected synchronously at configuration time
    Configuration,
    /// Bad data at the input boundary
    Input,
    /// Non-finite network state or output
    Numerical,
    /// Window not yet full
    InsufficientData,
    /// Lock unavailable on a tick
    Contention,
    /// Scheduler thread lifecycle
    Scheduler,
}

/// Classify error for recovery strategy selection
pub fn classify_error(error: &PredictorError) -> ErrorType {
    match error {
        PredictorError::InvalidTopology(_)
        | PredictorError::FeatureSizeMismatch { .. }
        | PredictorError::TargetSizeMismatch { .. }
        | PredictorError::InvalidConfig(_) => ErrorType::Configuration,

        PredictorError::InvalidSample(_, _) | PredictorError::NonFiniteInput => ErrorType::Input,

        PredictorError::NumericalDivergence { .. } => ErrorType::Numerical,

        PredictorError::InsufficientHistory { .. } => ErrorType::InsufficientData,

        PredictorError::Contended => ErrorType::Contention,

        PredictorError::SchedulerSpawnFailed(_) | PredictorError::SchedulerPanicked => {
            ErrorType::Scheduler
        }
    }
}

/// Recovery action to take after error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Refuse the request; previous state stays in effect
    Reject,

    /// Drop this sample or training step and carry on
    SkipSample,

    /// Return the last known raw position instead of a prediction
    FallBackToLastPosition,

    /// Discard the network and rebuild it with fresh weights
    RebuildNetwork,

    /// Skip this scheduler tick
    SkipTick,
}

/// Determine recovery action for error
pub fn recovery_action(error: &PredictorError) -> RecoveryAction {
    match classify_error(error) {
        ErrorType::Configuration | ErrorType::Scheduler => RecoveryAction::Reject,
        ErrorType::Input => RecoveryAction::SkipSample,
        ErrorType::Numerical => RecoveryAction::RebuildNetwork,
        ErrorType::InsufficientData => RecoveryAction::FallBackToLastPosition,
        ErrorType::Contention => RecoveryAction::SkipTick,
    }
}
