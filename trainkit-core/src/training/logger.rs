//! Run-statistics logging: per-epoch scalars and weight histograms written
//! as JSON lines under the logs directory.

use crate::error::FitError;
use crate::training::callbacks::{CallbackAction, TrainingCallback};
use crate::training::metrics::EpochLogs;
use crate::training::model::Model;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Distribution of one layer's weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
    pub count: usize,
    pub sum: f64,
    pub sum_squares: f64,
    /// Upper edge of each bucket.
    pub bucket_limits: Vec<f32>,
    pub bucket_counts: Vec<u64>,
}

impl Histogram {
    /// Bucket `values` into `bins` equal-width buckets. Non-finite values are
    /// ignored; `None` when nothing finite remains.
    pub fn from_values(values: &[f32], bins: usize) -> Option<Self> {
        let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let bins = bins.max(1);
        let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
        let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let width = (max - min) / bins as f32;

        let mut bucket_counts = vec![0u64; bins];
        let mut sum = 0.0;
        let mut sum_squares = 0.0;
        for &v in &finite {
            let idx = if width > 0.0 {
                (((v - min) / width) as usize).min(bins - 1)
            } else {
                0
            };
            bucket_counts[idx] += 1;
            sum += v as f64;
            sum_squares += (v as f64) * (v as f64);
        }
        let bucket_limits = (1..=bins).map(|i| min + width * i as f32).collect();

        Some(Self {
            min,
            max,
            count: finite.len(),
            sum,
            sum_squares,
            bucket_limits,
            bucket_counts,
        })
    }
}

/// One line of the event file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochEvent {
    /// 1-based.
    pub epoch: usize,
    pub wall_time: DateTime<Utc>,
    pub train: BTreeMap<String, f64>,
    pub validation: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub histograms: BTreeMap<String, Histogram>,
}

impl EpochEvent {
    /// Split epoch logs into training and `val_` scalars.
    pub fn from_logs(epoch: usize, logs: &EpochLogs) -> Self {
        let mut train = BTreeMap::new();
        let mut validation = BTreeMap::new();
        for (key, &value) in logs {
            match key.strip_prefix("val_") {
                Some(name) => {
                    validation.insert(name.to_string(), value);
                }
                None => {
                    train.insert(key.clone(), value);
                }
            }
        }
        Self {
            epoch,
            wall_time: Utc::now(),
            train,
            validation,
            histograms: BTreeMap::new(),
        }
    }
}

/// Appends an [`EpochEvent`] per epoch to `<logs_dir>/events.<start>.jsonl`.
pub struct RunLogger {
    logs_dir: PathBuf,
    histogram_freq: usize,
    histogram_bins: usize,
    writer: Option<BufWriter<File>>,
}

impl RunLogger {
    pub fn new(logs_dir: impl Into<PathBuf>, histogram_freq: usize, histogram_bins: usize) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            histogram_freq,
            histogram_bins,
            writer: None,
        }
    }

    fn open(&mut self) -> Result<(), FitError> {
        std::fs::create_dir_all(&self.logs_dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let path = self.logs_dir.join(format!("events.{stamp}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Writing run statistics");
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_event(&mut self, event: &EpochEvent) -> Result<(), FitError> {
        if self.writer.is_none() {
            self.open()?;
        }
        if let Some(writer) = self.writer.as_mut() {
            serde_json::to_writer(&mut *writer, event)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }
}

impl<M: Model> TrainingCallback<M> for RunLogger {
    fn name(&self) -> &'static str {
        "run_logger"
    }

    fn on_train_begin(&mut self, _model: &mut M) -> Result<(), FitError> {
        self.open()
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        logs: &EpochLogs,
        model: &mut M,
    ) -> Result<CallbackAction, FitError> {
        let mut event = EpochEvent::from_logs(epoch + 1, logs);
        if self.histogram_freq > 0 && (epoch + 1) % self.histogram_freq == 0 {
            for (layer, values) in model.layer_weights() {
                if let Some(hist) = Histogram::from_values(&values, self.histogram_bins) {
                    event.histograms.insert(layer, hist);
                }
            }
        }
        self.write_event(&event)?;
        Ok(CallbackAction::Continue)
    }

    fn on_train_end(&mut self, _model: &mut M) -> Result<(), FitError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
