//! The epoch/batch loop.

use crate::error::FitError;
use crate::training::callbacks::{CallbackAction, TrainingCallback};
use crate::training::compile::Monitor;
use crate::training::enqueuer::OrderedEnqueuer;
use crate::training::metrics::{EpochLogs, History, LogsAccumulator};
use crate::training::model::{BatchGenerator, Model};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Loop parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitParams {
    pub epochs: usize,
    pub workers: usize,
    pub max_queue_size: usize,
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    /// All epochs ran, or a callback stopped training after `epochs_run`.
    Completed {
        epochs_run: usize,
        stopped_early: bool,
    },
    /// The interrupt token fired during epoch `epoch` (0-based).
    Interrupted { epoch: usize },
}

type Callbacks<M> = [Box<dyn TrainingCallback<M>>];

/// Run up to `params.epochs` epochs over `train`, evaluating on `valid` after
/// each epoch. Scalars from validation are prefixed with `val_`; the current
/// learning rate is logged as `lr`.
#[allow(clippy::too_many_arguments)]
pub async fn fit<M, G, V>(
    model: &mut M,
    train: &Arc<G>,
    valid: Option<&Arc<V>>,
    params: FitParams,
    callbacks: &mut Callbacks<M>,
    monitor: &Monitor,
    history: &mut History,
    interrupt: &CancellationToken,
) -> Result<FitOutcome, FitError>
where
    M: Model,
    G: BatchGenerator<Batch = M::Batch>,
    V: BatchGenerator<Batch = M::Batch>,
{
    for cb in callbacks.iter_mut() {
        cb.on_train_begin(model)?;
    }

    let steps_per_epoch = train.len();
    for epoch in 0..params.epochs {
        if interrupt.is_cancelled() {
            return Ok(FitOutcome::Interrupted { epoch });
        }
        tracing::info!("Epoch {}/{}", epoch + 1, params.epochs);

        let mut train_logs = LogsAccumulator::new();
        let mut enqueuer =
            OrderedEnqueuer::start(Arc::clone(train), params.workers, params.max_queue_size);
        for step in 0..steps_per_epoch {
            let batch = tokio::select! {
                biased;
                _ = interrupt.cancelled() => return Ok(FitOutcome::Interrupted { epoch }),
                batch = enqueuer.next() => batch,
            };
            let Some(batch) = batch else { break };
            let batch = batch?;

            for cb in callbacks.iter_mut() {
                cb.on_batch_begin(step, model)?;
            }
            let logs = model.train_on_batch(batch)?;
            tracing::trace!(epoch = epoch + 1, step, ?logs, "Batch done");
            train_logs.add(&logs);
            for cb in callbacks.iter_mut() {
                cb.on_batch_end(step, &logs, model)?;
            }
        }
        drop(enqueuer);
        train.on_epoch_end();

        let mut epoch_logs = train_logs.means("");
        if let Some(valid) = valid {
            match evaluate(model, valid, params, interrupt).await? {
                Some(val_logs) => epoch_logs.extend(val_logs),
                None => return Ok(FitOutcome::Interrupted { epoch }),
            }
        }
        epoch_logs.insert("lr".to_string(), model.learning_rate());
        tracing::info!(epoch = epoch + 1, "{}", format_logs(&epoch_logs));

        history.record_epoch(epoch_logs.clone(), &monitor.key, monitor.mode);

        let mut stop = false;
        for cb in callbacks.iter_mut() {
            if cb.on_epoch_end(epoch, &epoch_logs, model)? == CallbackAction::Stop {
                tracing::debug!(callback = cb.name(), "Callback requested stop");
                stop = true;
            }
        }
        if stop {
            finish(model, callbacks)?;
            return Ok(FitOutcome::Completed {
                epochs_run: epoch + 1,
                stopped_early: true,
            });
        }
    }

    finish(model, callbacks)?;
    Ok(FitOutcome::Completed {
        epochs_run: params.epochs,
        stopped_early: false,
    })
}

/// Mean validation scalars, `None` if interrupted.
async fn evaluate<M, V>(
    model: &mut M,
    valid: &Arc<V>,
    params: FitParams,
    interrupt: &CancellationToken,
) -> Result<Option<EpochLogs>, FitError>
where
    M: Model,
    V: BatchGenerator<Batch = M::Batch>,
{
    let mut val_logs = LogsAccumulator::new();
    let mut enqueuer =
        OrderedEnqueuer::start(Arc::clone(valid), params.workers, params.max_queue_size);
    loop {
        let batch = tokio::select! {
            biased;
            _ = interrupt.cancelled() => return Ok(None),
            batch = enqueuer.next() => batch,
        };
        let Some(batch) = batch else { break };
        val_logs.add(&model.test_on_batch(batch?)?);
    }
    valid.on_epoch_end();
    Ok(Some(val_logs.means("val_")))
}

fn finish<M: Model>(model: &mut M, callbacks: &mut Callbacks<M>) -> Result<(), FitError> {
    for cb in callbacks.iter_mut() {
        cb.on_train_end(model)?;
    }
    Ok(())
}

/// `loss: 0.4213 - val_loss: 0.5120 - lr: 1.00e-4`
pub fn format_logs(logs: &EpochLogs) -> String {
    logs.iter()
        .map(|(key, value)| {
            if key == "lr" {
                format!("{key}: {value:.2e}")
            } else {
                format!("{key}: {value:.4}")
            }
        })
        .collect::<Vec<_>>()
        .join(" - ")
}
