//! Error types for Workout Relay

use thiserror::Error;

/// Status code reported for failures that never produced an HTTP response
pub const NO_STATUS: i32 = -1;

/// Errors surfaced by the session engine, transport, and controller
#[derive(Debug, Error)]
pub enum WorkoutError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Server responded {status}: {reason}")]
    Server { status: u16, reason: String },

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error("Can't start workout: {0}")]
    SessionStart(String),

    #[error("Workout session already running")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl WorkoutError {
    /// HTTP status associated with the failure, or `-1` when none was received.
    pub fn status_code(&self) -> i32 {
        match self {
            WorkoutError::Server { status, .. } => i32::from(*status),
            _ => NO_STATUS,
        }
    }
}

/// Errors produced while reading the heart rate source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplerError {
    #[error("no heart rate data available")]
    NoData,

    #[error("heart rate source failure: {0}")]
    Source(String),
}
