//! Training callbacks for early stopping, best checkpoints and the learning-rate schedule.

use crate::error::FitError;
use crate::training::checkpoint::CheckpointManifest;
use crate::training::compile::Monitor;
use crate::training::metrics::{EpochLogs, MonitorMode};
use crate::training::model::Model;
use crate::training::scheduler::WarmupCosineSchedule;
use std::path::PathBuf;

/// Action a callback can request at the end of an epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hooks invoked by the fit loop. Epochs are 0-based.
pub trait TrainingCallback<M: Model>: Send {
    fn name(&self) -> &'static str;

    fn on_train_begin(&mut self, _model: &mut M) -> Result<(), FitError> {
        Ok(())
    }

    fn on_batch_begin(&mut self, _step: usize, _model: &mut M) -> Result<(), FitError> {
        Ok(())
    }

    fn on_batch_end(
        &mut self,
        _step: usize,
        _logs: &EpochLogs,
        _model: &mut M,
    ) -> Result<(), FitError> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &EpochLogs,
        model: &mut M,
    ) -> Result<CallbackAction, FitError>;

    fn on_train_end(&mut self, _model: &mut M) -> Result<(), FitError> {
        Ok(())
    }
}

/// What one observation did to an [`EarlyStopping`] counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Improved,
    Waiting,
    Exhausted,
}

/// Stop when the monitored value has not improved by `min_delta` for
/// `patience` epochs, optionally rolling the model back to its best epoch.
#[derive(Debug, Clone)]
pub struct EarlyStopping<W> {
    pub monitor: String,
    pub mode: MonitorMode,
    pub min_delta: f64,
    pub patience: usize,
    pub restore_best_weights: bool,
    wait: usize,
    best: f64,
    best_weights: Option<W>,
}

impl<W> EarlyStopping<W> {
    pub fn new(
        monitor: &Monitor,
        min_delta: f64,
        patience: usize,
        restore_best_weights: bool,
    ) -> Self {
        Self {
            monitor: monitor.key.clone(),
            mode: monitor.mode,
            min_delta: min_delta.abs(),
            patience,
            restore_best_weights,
            wait: 0,
            best: monitor.mode.initial_best(),
            best_weights: None,
        }
    }

    /// Feed one epoch's monitored value.
    pub fn observe(&mut self, value: f64) -> Observation {
        if self.mode.improves(value, self.best, self.min_delta) {
            self.best = value;
            self.wait = 0;
            Observation::Improved
        } else {
            self.wait += 1;
            if self.wait >= self.patience {
                Observation::Exhausted
            } else {
                Observation::Waiting
            }
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

impl<M: Model> TrainingCallback<M> for EarlyStopping<M::Weights> {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &EpochLogs,
        model: &mut M,
    ) -> Result<CallbackAction, FitError> {
        let Some(&value) = logs.get(&self.monitor) else {
            tracing::warn!(
                monitor = %self.monitor,
                available = ?logs.keys().collect::<Vec<_>>(),
                "Early stopping conditioned on a metric that is not available"
            );
            return Ok(CallbackAction::Continue);
        };

        match self.observe(value) {
            Observation::Improved => {
                if self.restore_best_weights {
                    self.best_weights = Some(model.weights());
                }
                Ok(CallbackAction::Continue)
            }
            Observation::Waiting => Ok(CallbackAction::Continue),
            Observation::Exhausted => {
                tracing::info!(
                    epoch = epoch + 1,
                    monitor = %self.monitor,
                    best = self.best,
                    "Early stopping"
                );
                if self.restore_best_weights {
                    if let Some(weights) = self.best_weights.clone() {
                        tracing::info!("Restoring model weights from the end of the best epoch");
                        model.set_weights(weights);
                    }
                }
                Ok(CallbackAction::Stop)
            }
        }
    }
}

/// Save the model to a fixed path whenever the monitored value improves.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    pub path: PathBuf,
    pub monitor: String,
    pub mode: MonitorMode,
    best: f64,
    manifest: Option<CheckpointManifest>,
}

impl ModelCheckpoint {
    pub fn new(path: PathBuf, monitor: &Monitor) -> Self {
        Self {
            path,
            monitor: monitor.key.clone(),
            mode: monitor.mode,
            best: monitor.mode.initial_best(),
            manifest: None,
        }
    }

    /// Also record each save in a checkpoint manifest.
    pub fn with_manifest(mut self, manifest: CheckpointManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }
}

impl<M: Model> TrainingCallback<M> for ModelCheckpoint {
    fn name(&self) -> &'static str {
        "model_checkpoint"
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &EpochLogs,
        model: &mut M,
    ) -> Result<CallbackAction, FitError> {
        let Some(&value) = logs.get(&self.monitor) else {
            tracing::warn!(
                monitor = %self.monitor,
                "Can save best model only with the monitored metric available, skipping"
            );
            return Ok(CallbackAction::Continue);
        };

        if self.mode.improves(value, self.best, 0.0) {
            tracing::info!(
                epoch = epoch + 1,
                monitor = %self.monitor,
                previous = self.best,
                current = value,
                path = %self.path.display(),
                "Monitored metric improved, saving model"
            );
            self.best = value;
            model.save(&self.path, true)?;
            if let Some(manifest) = &self.manifest {
                manifest.record(epoch + 1, &self.monitor, value, &self.path)?;
            }
        } else {
            tracing::debug!(
                epoch = epoch + 1,
                monitor = %self.monitor,
                best = self.best,
                "Monitored metric did not improve"
            );
        }
        Ok(CallbackAction::Continue)
    }
}

/// Drive the model learning rate from a [`WarmupCosineSchedule`], one
/// global step per training batch.
#[derive(Debug, Clone)]
pub struct WarmupCosineScheduler {
    schedule: WarmupCosineSchedule,
    global_step: usize,
}

impl WarmupCosineScheduler {
    pub fn new(schedule: WarmupCosineSchedule) -> Self {
        Self {
            schedule,
            global_step: 0,
        }
    }
}

impl<M: Model> TrainingCallback<M> for WarmupCosineScheduler {
    fn name(&self) -> &'static str {
        "warmup_cosine_decay"
    }

    fn on_batch_begin(&mut self, _step: usize, model: &mut M) -> Result<(), FitError> {
        let lr = self.schedule.rate(self.global_step);
        model.set_learning_rate(lr);
        tracing::trace!(global_step = self.global_step, lr, "Setting learning rate");
        Ok(())
    }

    fn on_batch_end(
        &mut self,
        _step: usize,
        _logs: &EpochLogs,
        _model: &mut M,
    ) -> Result<(), FitError> {
        self.global_step += 1;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        _logs: &EpochLogs,
        model: &mut M,
    ) -> Result<CallbackAction, FitError> {
        tracing::debug!(
            epoch = epoch + 1,
            global_step = self.global_step,
            lr = model.learning_rate(),
            "Learning rate at epoch end"
        );
        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(mode: MonitorMode) -> Monitor {
        Monitor {
            key: "val_loss".to_string(),
            metric: "val_loss".to_string(),
            mode,
        }
    }

    #[test]
    fn test_early_stopping() {
        let mut cb: EarlyStopping<()> =
            EarlyStopping::new(&monitor(MonitorMode::Min), 0.01, 3, true);
        assert_eq!(cb.observe(0.5), Observation::Improved); // first: best=0.5
        assert_eq!(cb.observe(0.4), Observation::Improved); // improves: best=0.4, wait=0
        assert_eq!(cb.observe(0.395), Observation::Waiting); // within delta: wait=1
        assert_eq!(cb.observe(0.4), Observation::Waiting); // wait=2
        assert_eq!(cb.observe(0.4), Observation::Exhausted); // wait=3 >= patience
        assert_eq!(cb.best(), 0.4);
    }

    #[test]
    fn test_early_stopping_max_mode() {
        let mut cb: EarlyStopping<()> =
            EarlyStopping::new(&monitor(MonitorMode::Max), 0.001, 1, false);
        assert_eq!(cb.observe(0.7), Observation::Improved);
        assert_eq!(cb.observe(0.8), Observation::Improved);
        assert_eq!(cb.observe(0.75), Observation::Exhausted);
    }

    #[test]
    fn test_early_stopping_nan_never_improves() {
        let mut cb: EarlyStopping<()> =
            EarlyStopping::new(&monitor(MonitorMode::Min), 0.0, 2, false);
        assert_eq!(cb.observe(f64::NAN), Observation::Waiting);
        assert_eq!(cb.observe(f64::NAN), Observation::Exhausted);
    }
}
