//! Optimizer description and monitored-metric resolution.

use crate::error::FitError;
use crate::training::metrics::{MetricSpec, MonitorMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimizer handed to the backend at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimizer {
    Adam {
        learning_rate: f64,
        beta_1: f64,
        beta_2: f64,
        epsilon: f64,
        decay: f64,
    },
}

impl Optimizer {
    /// Adam with β1=0.9, β2=0.999, ε=1e-8 and no decay.
    pub fn adam(learning_rate: f64) -> Self {
        Self::Adam {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
            decay: 0.0,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam { learning_rate, .. } => *learning_rate,
        }
    }
}

/// What early stopping and checkpointing watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    /// Key looked up in epoch logs, e.g. `val_loss`.
    pub key: String,
    /// Metric name passed to `Model::compile`.
    pub metric: String,
    pub mode: MonitorMode,
}

/// Resolve the monitor from the configured key and optional metrics dictionary.
///
/// With a dictionary the key must be present. Without one the compiled metric
/// is the key itself and the mode is inferred from its name.
pub fn resolve_monitor(
    key: &str,
    metrics: Option<&BTreeMap<String, MetricSpec>>,
) -> Result<Monitor, FitError> {
    match metrics.filter(|dict| !dict.is_empty()) {
        Some(dict) => {
            let spec = dict.get(key).ok_or_else(|| {
                FitError::config(format!(
                    "metrics dictionary has no entry for monitored metric '{key}' (known: {})",
                    dict.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })?;
            Ok(Monitor {
                key: key.to_string(),
                metric: spec.name.clone(),
                mode: spec.best_value,
            })
        }
        None => Ok(Monitor {
            key: key.to_string(),
            metric: key.to_string(),
            mode: MonitorMode::infer(key),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adam_hyperparameters() {
        let opt = Optimizer::adam(1e-3);
        assert_eq!(
            opt,
            Optimizer::Adam {
                learning_rate: 1e-3,
                beta_1: 0.9,
                beta_2: 0.999,
                epsilon: 1e-8,
                decay: 0.0,
            }
        );
        assert_eq!(opt.learning_rate(), 1e-3);
    }

    #[test]
    fn test_resolve_from_dictionary() {
        let mut dict = BTreeMap::new();
        dict.insert(
            "val_accuracy".to_string(),
            MetricSpec {
                name: "accuracy".to_string(),
                best_value: MonitorMode::Max,
            },
        );
        let monitor = resolve_monitor("val_accuracy", Some(&dict)).unwrap();
        assert_eq!(monitor.metric, "accuracy");
        assert_eq!(monitor.key, "val_accuracy");
        assert_eq!(monitor.mode, MonitorMode::Max);
    }

    #[test]
    fn test_resolve_without_dictionary_defaults_to_key() {
        let monitor = resolve_monitor("val_loss", None).unwrap();
        assert_eq!(monitor.metric, "val_loss");
        assert_eq!(monitor.mode, MonitorMode::Min);
    }

    #[test]
    fn test_resolve_missing_key_is_config_error() {
        let mut dict = BTreeMap::new();
        dict.insert(
            "val_recall".to_string(),
            MetricSpec {
                name: "recall".to_string(),
                best_value: MonitorMode::Max,
            },
        );
        assert!(matches!(
            resolve_monitor("val_loss", Some(&dict)),
            Err(FitError::Config(_))
        ));
    }
}
