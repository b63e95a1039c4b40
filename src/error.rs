//! Error types for the scoring pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by feature extraction, scoring, training and artifact IO
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A transaction record lacks a required field or carries an
    /// unparseable value. Surfaced to the caller, never retried.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A computed score is NaN or infinite. Halts the scoring request.
    #[error("Invalid score: {name} = {value}")]
    InvalidScore { name: String, value: f64 },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Artifact '{name}': {reason}")]
    Artifact { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub(crate) fn invalid_score(name: &str, value: f64) -> Self {
        PipelineError::InvalidScore {
            name: name.to_string(),
            value,
        }
    }

    pub(crate) fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        PipelineError::ShapeError {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
