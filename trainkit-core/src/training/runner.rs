//! `train`: session setup, freezing, compilation, callbacks and the fit loop.

use crate::config::FitConfig;
use crate::error::FitError;
use crate::persistence::copy_tree;
use crate::training::callbacks::{
    EarlyStopping, ModelCheckpoint, TrainingCallback, WarmupCosineScheduler,
};
use crate::training::checkpoint::CheckpointManifest;
use crate::training::compile::{Monitor, Optimizer, resolve_monitor};
use crate::training::fit::{FitOutcome, FitParams, fit};
use crate::training::freeze::freeze_layers;
use crate::training::logger::RunLogger;
use crate::training::metrics::History;
use crate::training::model::{BatchGenerator, Layer, Model};
use crate::training::scheduler::WarmupCosineSchedule;
use crate::training::session::{SessionRecord, SessionStatus, TrainingSession};
use crate::training::timing::format_duration;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Checkpoint manifest entries kept per session.
const MAX_CHECKPOINT_ENTRIES: usize = 100;

/// Result of a training run that reached a terminal state.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub session_dir: PathBuf,
    /// Model layers after training, with their final trainable flags.
    pub layers: Vec<Layer>,
    /// Best-weights file on completion, interrupt-weights file on interrupt.
    pub weights_path: PathBuf,
    pub status: SessionStatus,
    pub frozen_layers: Vec<String>,
    pub history: History,
    pub elapsed: Duration,
}

impl TrainOutput {
    pub fn elapsed_message(&self) -> String {
        format_duration(self.elapsed)
    }
}

/// A token that is cancelled on the first Ctrl-C, for passing to [`train`].
/// Must be called from within a Tokio runtime.
pub fn interrupt_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received, saving current weights");
                trigger.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Unable to listen for Ctrl-C"),
        }
    });
    token
}

/// Train `model` on `train_gen`, validating on `valid_gen` after every epoch.
///
/// Creates `<project_folder>/<timestamp>/`, freezes layers before
/// `first_trainable_layer`, compiles with Adam and the monitored metric, and
/// runs the fit loop with early stopping, best-checkpoint saving, a warm-up
/// cosine learning-rate schedule, and run logging. Cancelling `interrupt`
/// saves the current weights (without optimizer state) to the `_ctrlc.h5`
/// path instead. Either way the logs directory is copied into the session.
pub async fn train<M, G, V>(
    model: &mut M,
    loss: M::Loss,
    train_gen: Arc<G>,
    valid_gen: Arc<V>,
    config: &FitConfig,
    interrupt: CancellationToken,
) -> Result<TrainOutput, FitError>
where
    M: Model,
    G: BatchGenerator<Batch = M::Batch>,
    V: BatchGenerator<Batch = M::Batch>,
{
    config.validate()?;
    if train_gen.is_empty() {
        return Err(FitError::config("training generator yields no batches"));
    }
    let monitor = resolve_monitor(&config.metric, config.metrics.as_ref())?;
    let steps_per_epoch = train_gen.len();
    let schedule = WarmupCosineSchedule::for_run(
        config.learning_rate,
        steps_per_epoch,
        config.nb_epoch,
        &config.warmup,
    )?;

    // Setup
    let started = Instant::now();
    let session = TrainingSession::create(&config.project_folder, model.name(), &config.metric)?;
    session.write_manifest(&SessionRecord {
        config: Some(config),
        ..SessionRecord::new(SessionStatus::Running)
    })?;

    let result = run_session(
        model,
        loss,
        &train_gen,
        &valid_gen,
        config,
        &session,
        monitor,
        schedule,
        &interrupt,
        started,
    )
    .await;

    if let Err(err) = &result {
        let message = err.to_string();
        let record = SessionRecord {
            config: Some(config),
            error: Some(&message),
            ..SessionRecord::new(SessionStatus::Failed)
        };
        if let Err(e) = session.write_manifest(&record) {
            tracing::warn!(error = %e, "Failed to record session failure");
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_session<M, G, V>(
    model: &mut M,
    loss: M::Loss,
    train_gen: &Arc<G>,
    valid_gen: &Arc<V>,
    config: &FitConfig,
    session: &TrainingSession,
    monitor: Monitor,
    schedule: WarmupCosineSchedule,
    interrupt: &CancellationToken,
    started: Instant,
) -> Result<TrainOutput, FitError>
where
    M: Model,
    G: BatchGenerator<Batch = M::Batch>,
    V: BatchGenerator<Batch = M::Batch>,
{
    let frozen_layers = freeze_layers(model.layers_mut(), config.first_trainable_layer.as_deref())?;

    // Compiling
    let optimizer = Optimizer::adam(config.learning_rate);
    model.compile(&optimizer, loss, std::slice::from_ref(&monitor.metric))?;
    model.set_learning_rate(config.learning_rate);
    tracing::info!("{}", model.summary());
    tracing::info!(
        monitor = %monitor.key,
        metric = %monitor.metric,
        mode = %monitor.mode,
        warmup_steps = schedule.warmup_steps,
        total_steps = schedule.total_steps,
        "Compiled model"
    );

    let mut callbacks: Vec<Box<dyn TrainingCallback<M>>> = vec![
        Box::new(EarlyStopping::<M::Weights>::new(
            &monitor,
            config.early_stopping.min_delta,
            config.early_stopping.patience,
            config.early_stopping.restore_best_weights,
        )),
        Box::new(
            ModelCheckpoint::new(session.best_weights.clone(), &monitor)
                .with_manifest(CheckpointManifest::new(&session.dir, MAX_CHECKPOINT_ENTRIES)),
        ),
        Box::new(WarmupCosineScheduler::new(schedule)),
        Box::new(RunLogger::new(
            config.logging.logs_dir.clone(),
            config.logging.histogram_freq,
            config.logging.histogram_bins,
        )),
    ];

    // Training
    let params = FitParams {
        epochs: config.nb_epoch,
        workers: config.loader.workers,
        max_queue_size: config.loader.max_queue_size,
    };
    let valid = (!valid_gen.is_empty()).then_some(valid_gen);
    let mut history = History::default();
    let outcome = fit(
        model,
        train_gen,
        valid,
        params,
        &mut callbacks,
        &monitor,
        &mut history,
        interrupt,
    )
    .await?;
    drop(callbacks);

    let (status, weights_path) = match outcome {
        FitOutcome::Interrupted { epoch } => {
            tracing::info!(
                epoch = epoch + 1,
                "Interrupted, saving model and copying logs"
            );
            model.save(&session.interrupt_weights, false)?;
            (SessionStatus::Interrupted, session.interrupt_weights.clone())
        }
        FitOutcome::Completed {
            epochs_run,
            stopped_early,
        } => {
            tracing::info!(epochs_run, stopped_early, "Training finished");
            if !session.best_weights.exists() {
                tracing::warn!(
                    path = %session.best_weights.display(),
                    "No checkpoint was written; '{}' never improved or was never reported",
                    monitor.key
                );
            }
            (SessionStatus::Completed, session.best_weights.clone())
        }
    };

    copy_tree(&config.logging.logs_dir, &session.logs_copy)?;

    let output = TrainOutput {
        session_dir: session.dir.clone(),
        layers: model.layers().to_vec(),
        weights_path,
        status,
        frozen_layers,
        history,
        elapsed: started.elapsed(),
    };
    if status == SessionStatus::Completed {
        tracing::info!("{}", output.elapsed_message());
    }

    session.write_manifest(&SessionRecord {
        status,
        weights_path: Some(&output.weights_path),
        frozen_layers: &output.frozen_layers,
        history: Some(&output.history),
        config: Some(config),
        error: None,
    })?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_c_token_starts_live() {
        let token = tokio_test::block_on(async {
            let token = interrupt_on_ctrl_c();
            tokio::task::yield_now().await;
            token
        });
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_elapsed_message() {
        let output = TrainOutput {
            session_dir: PathBuf::from("project/2024-01-01_00-00-00"),
            layers: vec![Layer::new("conv_1")],
            weights_path: PathBuf::from("project/2024-01-01_00-00-00/net_best_val_loss.h5"),
            status: SessionStatus::Completed,
            frozen_layers: Vec::new(),
            history: History::default(),
            elapsed: Duration::from_secs(125),
        };
        assert_eq!(output.elapsed_message(), "2-mins to train");
    }
}
