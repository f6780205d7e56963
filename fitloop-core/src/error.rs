//! Error types for the fitloop-core crate.

use thiserror::Error;

/// Top-level error type for harness operations.
///
/// Every variant is fatal to the run that produced it: the orchestrator never
/// catches errors from its collaborators.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Invalid label {label} at row {row}: {reason}")]
    InvalidLabel {
        row: usize,
        label: f32,
        reason: &'static str,
    },

    #[error("Non-finite loss {value} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss {
        epoch: usize,
        batch: usize,
        value: f64,
    },

    #[error("Non-finite metric {value} at epoch {epoch}")]
    NonFiniteMetric { epoch: usize, value: f64 },

    #[error("Empty {split} set: no samples to process")]
    EmptyDataset { split: &'static str },

    #[error("Policy {0} requires a validation batch provider")]
    MissingValidation(&'static str),

    #[error("Policy mismatch: {0}")]
    PolicyMismatch(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl HarnessError {
    pub fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}

impl From<Box<figment::Error>> for HarnessError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::Config(err.to_string())
    }
}
