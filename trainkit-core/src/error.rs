//! Error types for the trainkit-core crate.

use thiserror::Error;

/// Top-level error type for training-session operations.
#[derive(Debug, Error)]
pub enum FitError {
    /// The requested first trainable layer does not exist in the model.
    #[error("First trainable layer '{name}' is not in the model")]
    UnknownLayer {
        name: String,
        available: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    /// Failure reported by the model backend (compile, step, save, ...).
    #[error("Model backend error: {0}")]
    Backend(String),

    /// Failure while producing a batch from a generator.
    #[error("Batch generator error at index {index}: {message}")]
    Batch { index: usize, message: String },

    #[error("Prefetch worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl FitError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn schedule(msg: impl Into<String>) -> Self {
        Self::Schedule(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn batch(index: usize, msg: impl Into<String>) -> Self {
        Self::Batch {
            index,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<Box<figment::Error>> for FitError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::Config(err.to_string())
    }
}
