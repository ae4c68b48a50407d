//! Monitored quantities, epoch logs, and run history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalars produced by one batch or one epoch, keyed by name
/// (`loss`, metric names, `val_`-prefixed validation values, `lr`).
pub type EpochLogs = BTreeMap<String, f64>;

/// Which direction counts as an improvement for a monitored quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Min,
    Max,
}

impl MonitorMode {
    /// Guess the direction from a monitor name: accuracy-like names are
    /// maximised, everything else is minimised.
    pub fn infer(monitor: &str) -> Self {
        let lower = monitor.to_ascii_lowercase();
        if ["acc", "auc", "f1", "iou", "precision", "recall"]
            .iter()
            .any(|needle| lower.contains(needle))
        {
            Self::Max
        } else {
            Self::Min
        }
    }

    /// The value every real observation improves on.
    pub fn initial_best(self) -> f64 {
        match self {
            Self::Min => f64::INFINITY,
            Self::Max => f64::NEG_INFINITY,
        }
    }

    /// `current` beats `best` by more than `min_delta`.
    pub fn improves(self, current: f64, best: f64, min_delta: f64) -> bool {
        if current.is_nan() {
            return false;
        }
        match self {
            Self::Min => current + min_delta < best,
            Self::Max => current - min_delta > best,
        }
    }
}

impl std::fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// Entry of the metrics dictionary: the compiled metric for a monitor key
/// and whether lower or higher is better.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub best_value: MonitorMode,
}

/// Per-epoch record of a training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub epochs_completed: usize,
    pub epochs: Vec<EpochLogs>,
    pub best_epoch: Option<usize>,
    pub best_value: Option<f64>,
}

impl History {
    /// Append an epoch and track the best value of `monitor`.
    pub fn record_epoch(&mut self, logs: EpochLogs, monitor: &str, mode: MonitorMode) {
        self.epochs_completed += 1;
        if let Some(&value) = logs.get(monitor) {
            let best = self.best_value.unwrap_or(mode.initial_best());
            if mode.improves(value, best, 0.0) {
                self.best_value = Some(value);
                self.best_epoch = Some(self.epochs_completed);
            }
        }
        self.epochs.push(logs);
    }

    /// Values of one scalar across epochs, skipping epochs that lack it.
    pub fn series(&self, key: &str) -> Vec<f64> {
        self.epochs
            .iter()
            .filter_map(|logs| logs.get(key).copied())
            .collect()
    }
}

/// Running mean of batch scalars over an epoch.
#[derive(Debug, Clone, Default)]
pub struct LogsAccumulator {
    sums: BTreeMap<String, f64>,
    counts: BTreeMap<String, usize>,
}

impl LogsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, logs: &EpochLogs) {
        for (key, value) in logs {
            *self.sums.entry(key.clone()).or_default() += value;
            *self.counts.entry(key.clone()).or_default() += 1;
        }
    }

    /// Means, with every key prefixed by `prefix`.
    pub fn means(&self, prefix: &str) -> EpochLogs {
        self.sums
            .iter()
            .map(|(key, sum)| {
                let count = self.counts.get(key).copied().unwrap_or(1).max(1);
                (format!("{prefix}{key}"), sum / count as f64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(pairs: &[(&str, f64)]) -> EpochLogs {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_infer_mode() {
        assert_eq!(MonitorMode::infer("val_loss"), MonitorMode::Min);
        assert_eq!(MonitorMode::infer("val_accuracy"), MonitorMode::Max);
        assert_eq!(MonitorMode::infer("val_mean_IoU"), MonitorMode::Max);
        assert_eq!(MonitorMode::infer("val_mape"), MonitorMode::Min);
        assert_eq!(MonitorMode::infer("mae"), MonitorMode::Min);
    }

    #[test]
    fn test_improves_respects_delta() {
        assert!(MonitorMode::Min.improves(0.5, f64::INFINITY, 0.001));
        assert!(MonitorMode::Min.improves(0.498, 0.5, 0.001));
        assert!(!MonitorMode::Min.improves(0.4995, 0.5, 0.001));
        assert!(MonitorMode::Max.improves(0.91, 0.9, 0.001));
        assert!(!MonitorMode::Max.improves(0.9005, 0.9, 0.001));
        assert!(!MonitorMode::Min.improves(f64::NAN, 1.0, 0.0));
    }

    #[test]
    fn test_history_tracks_best() {
        let mut history = History::default();
        history.record_epoch(
            logs(&[("loss", 0.5), ("val_loss", 0.6)]),
            "val_loss",
            MonitorMode::Min,
        );
        history.record_epoch(
            logs(&[("loss", 0.3), ("val_loss", 0.4)]),
            "val_loss",
            MonitorMode::Min,
        );
        history.record_epoch(
            logs(&[("loss", 0.2), ("val_loss", 0.45)]),
            "val_loss",
            MonitorMode::Min,
        );
        assert_eq!(history.epochs_completed, 3);
        assert_eq!(history.best_epoch, Some(2));
        assert_eq!(history.best_value, Some(0.4));
        assert_eq!(history.series("loss"), vec![0.5, 0.3, 0.2]);
    }

    #[test]
    fn test_accumulator_means_with_prefix() {
        let mut acc = LogsAccumulator::new();
        acc.add(&logs(&[("loss", 1.0), ("accuracy", 0.5)]));
        acc.add(&logs(&[("loss", 3.0), ("accuracy", 0.7)]));
        let means = acc.means("val_");
        assert_eq!(means["val_loss"], 2.0);
        assert!((means["val_accuracy"] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_metric_spec_deserializes_lowercase_mode() {
        let spec: MetricSpec =
            serde_json::from_str(r#"{"name": "accuracy", "best_value": "max"}"#).unwrap();
        assert_eq!(spec.best_value, MonitorMode::Max);
    }
}
