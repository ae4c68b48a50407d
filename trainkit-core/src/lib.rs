//! # trainkit-core: training-session orchestration
//!
//! Wraps a model backend's training API with the bookkeeping around a run:
//! a timestamped session folder, layer freezing, compilation with an Adam
//! optimizer, early stopping, best-checkpoint saving, a warm-up cosine
//! learning-rate schedule, run logging, ordered batch prefetching and
//! interrupt handling.
//!
//! Gradient computation stays in the backend behind [`Model`].

pub mod config;
pub mod error;
pub mod persistence;
pub mod training;

// Re-exports
pub use config::{FitConfig, load_config};
pub use error::FitError;
pub use training::{
    BatchGenerator, Layer, Model, SessionStatus, TrainOutput, interrupt_on_ctrl_c, train,
};
