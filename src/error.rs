//! Error types for the load generator.

use thiserror::Error;

use crate::backend::BackendError;

/// Result type alias for pool-stress operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Backend error raised outside of a simulated connection
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    /// Logging setup error
    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Fatal condition inside one simulated connection.
///
/// An anomaly ends the owning simulator abnormally. It is never propagated
/// past the task that raised it.
#[derive(Debug, Error)]
pub enum Anomaly {
    /// The statement's outcome disagreed with what the caller declared.
    #[error("statement `{statement}` {}", mismatch_direction(.expected_failure))]
    ExpectationMismatch {
        statement: String,
        expected_failure: bool,
        #[source]
        cause: Option<BackendError>,
    },

    /// The backend could not hand out a connection.
    #[error("connection acquisition failed: {0}")]
    AcquisitionFailure(#[source] BackendError),
}

fn mismatch_direction(expected_failure: &bool) -> &'static str {
    if *expected_failure {
        "succeeded but was expected to fail"
    } else {
        "failed but was expected to succeed"
    }
}

impl Anomaly {
    /// Short machine-friendly name used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::ExpectationMismatch { .. } => "expectation_mismatch",
            Anomaly::AcquisitionFailure(_) => "acquisition_failure",
        }
    }
}
