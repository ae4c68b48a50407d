//! The seams between the orchestration layer and a training backend.
//!
//! `trainkit` never computes gradients or touches tensors. A backend exposes
//! its network through [`Model`] and its data through [`BatchGenerator`];
//! everything else in this crate drives those two traits.

use crate::error::FitError;
use crate::training::compile::Optimizer;
use crate::training::metrics::EpochLogs;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A named layer and whether its weights are updated during training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub trainable: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trainable: true,
        }
    }
}

/// A trainable network owned by some backend.
pub trait Model: Send {
    /// Loss function handed to [`Model::compile`].
    type Loss: Send;
    /// One `(input, label)` batch as produced by a [`BatchGenerator`].
    type Batch: Send + 'static;
    /// In-memory snapshot of all weights, used to restore the best epoch.
    type Weights: Clone + Send + 'static;

    fn name(&self) -> &str;

    /// Layers in forward order.
    fn layers(&self) -> &[Layer];

    fn layers_mut(&mut self) -> &mut [Layer];

    /// Attach optimizer, loss and metrics. Must be called after freezing so
    /// the backend sees the final trainable flags.
    fn compile(
        &mut self,
        optimizer: &Optimizer,
        loss: Self::Loss,
        metrics: &[String],
    ) -> Result<(), FitError>;

    /// Human-readable architecture summary.
    fn summary(&self) -> String {
        let mut out = format!("Model: {}\n", self.name());
        for (i, layer) in self.layers().iter().enumerate() {
            let flag = if layer.trainable { "" } else { " (frozen)" };
            out.push_str(&format!("  {i:>3} {}{flag}\n", layer.name));
        }
        let trainable = self.layers().iter().filter(|l| l.trainable).count();
        out.push_str(&format!(
            "Trainable layers: {trainable}/{}",
            self.layers().len()
        ));
        out
    }

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    /// One optimizer step. Returns batch scalars, at least `loss`.
    fn train_on_batch(&mut self, batch: Self::Batch) -> Result<EpochLogs, FitError>;

    /// Evaluate without updating weights. Returns batch scalars, at least `loss`.
    fn test_on_batch(&mut self, batch: Self::Batch) -> Result<EpochLogs, FitError>;

    fn weights(&self) -> Self::Weights;

    fn set_weights(&mut self, weights: Self::Weights);

    /// Persist the model to `path`, overwriting any existing file.
    fn save(&self, path: &Path, include_optimizer: bool) -> Result<(), FitError>;

    /// Flattened weights per layer, for histogram logging. Backends that
    /// cannot cheaply expose weights return nothing.
    fn layer_weights(&self) -> Vec<(String, Vec<f32>)> {
        Vec::new()
    }
}

/// An indexable, finite sequence of batches.
///
/// Generators are shared with prefetch workers, so `get` takes `&self` and
/// may be called concurrently for different indices.
pub trait BatchGenerator: Send + Sync + 'static {
    type Batch: Send + 'static;

    /// Number of batches per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Self::Batch, FitError>;

    /// Called once the fit loop has consumed an epoch (e.g. to reshuffle).
    fn on_epoch_end(&self) {}
}
