//! Configuration for training sessions.
//!
//! Uses `figment` for layered configuration: defaults -> user file -> workspace
//! file -> explicit file -> environment. Configuration is loaded from
//! `~/.config/trainkit/config.toml` and/or `.trainkit/config.toml` in the
//! workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::FitError;
use crate::training::metrics::MetricSpec;

/// Everything `train` needs besides the model and the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Base learning rate, reached at the end of warm-up.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Number of epochs to run.
    #[serde(default = "default_nb_epoch")]
    pub nb_epoch: usize,
    /// Parent directory of timestamped session folders.
    #[serde(default = "default_project_folder")]
    pub project_folder: PathBuf,
    /// Layers before the first layer with this name are frozen.
    #[serde(default)]
    pub first_trainable_layer: Option<String>,
    /// Quantity watched by early stopping and checkpointing.
    #[serde(default = "default_metric")]
    pub metric: String,
    /// Optional monitor name -> compiled metric and comparison mode.
    #[serde(default)]
    pub metrics: Option<BTreeMap<String, MetricSpec>>,
    #[serde(default)]
    pub early_stopping: EarlyStoppingConfig,
    #[serde(default)]
    pub warmup: WarmupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            nb_epoch: default_nb_epoch(),
            project_folder: default_project_folder(),
            first_trainable_layer: None,
            metrics: None,
            metric: default_metric(),
            early_stopping: EarlyStoppingConfig::default(),
            warmup: WarmupConfig::default(),
            logging: LoggingConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl FitConfig {
    /// Reject values the fit loop cannot run with.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.nb_epoch == 0 {
            return Err(FitError::config("nb_epoch must be at least 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            return Err(FitError::config(format!(
                "learning_rate must be a finite non-negative number, got {}",
                self.learning_rate
            )));
        }
        if self.metric.trim().is_empty() {
            return Err(FitError::config("metric must not be empty"));
        }
        if self.loader.workers == 0 {
            return Err(FitError::config("loader.workers must be at least 1"));
        }
        if self.loader.max_queue_size == 0 {
            return Err(FitError::config("loader.max_queue_size must be at least 1"));
        }
        if self.early_stopping.min_delta < 0.0 {
            return Err(FitError::config("early_stopping.min_delta must be >= 0"));
        }
        Ok(())
    }
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_nb_epoch() -> usize {
    300
}

fn default_project_folder() -> PathBuf {
    PathBuf::from("project")
}

fn default_metric() -> String {
    "val_loss".to_string()
}

/// Early stopping policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    /// Epochs without improvement before stopping.
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_true")]
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            min_delta: default_min_delta(),
            patience: default_patience(),
            restore_best_weights: true,
        }
    }
}

fn default_min_delta() -> f64 {
    0.001
}

fn default_patience() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// Warm-up cosine decay parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Upper bound on warm-up length, in epochs.
    #[serde(default = "default_max_warmup_epochs")]
    pub max_warmup_epochs: usize,
    #[serde(default)]
    pub warmup_learning_rate: f64,
    #[serde(default)]
    pub hold_base_rate_steps: usize,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            max_warmup_epochs: default_max_warmup_epochs(),
            warmup_learning_rate: 0.0,
            hold_base_rate_steps: 0,
        }
    }
}

fn default_max_warmup_epochs() -> usize {
    3
}

/// Run-statistics logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory the logging callback writes to; copied into the session.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// Write weight histograms every N epochs (0 disables).
    #[serde(default = "default_histogram_freq")]
    pub histogram_freq: usize,
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            histogram_freq: default_histogram_freq(),
            histogram_bins: default_histogram_bins(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_histogram_freq() -> usize {
    1
}

fn default_histogram_bins() -> usize {
    30
}

/// Prefetch pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Batches claimed by workers but not yet consumed.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_max_queue_size() -> usize {
    10
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `TRAINKIT_`)
/// 2. Explicit config file
/// 3. Workspace-local config (`.trainkit/config.toml`)
/// 4. User config (`~/.config/trainkit/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<FitConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(FitConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".trainkit").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    // TRAINKIT_NB_EPOCH, TRAINKIT_EARLY_STOPPING__PATIENCE, ...
    figment = figment.merge(Env::prefixed("TRAINKIT_").split("__"));

    figment.extract().map_err(Box::new)
}

/// `~/.config/trainkit/config.toml` (platform equivalent).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "trainkit", "trainkit")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Render a config as TOML, as `trainkit config` shows it.
pub fn to_toml(config: &FitConfig) -> Result<String, FitError> {
    toml::to_string_pretty(config).map_err(|e| FitError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::MonitorMode;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_train_signature() {
        let config = FitConfig::default();
        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.nb_epoch, 300);
        assert_eq!(config.project_folder, PathBuf::from("project"));
        assert!(config.first_trainable_layer.is_none());
        assert!(config.metrics.is_none());
        assert_eq!(config.metric, "val_loss");
        assert_eq!(config.early_stopping.patience, 20);
        assert_eq!(config.early_stopping.min_delta, 0.001);
        assert_eq!(config.loader.workers, 4);
        assert_eq!(config.loader.max_queue_size, 10);
        assert_eq!(config.logging.logs_dir, PathBuf::from("logs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_epochs() {
        let config = FitConfig {
            nb_epoch: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FitError::Config(_))));
    }

    #[test]
    fn test_validate_learning_rate_bounds() {
        let zero = FitConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_ok());

        for bad in [-1e-4, f64::NAN, f64::INFINITY] {
            let config = FitConfig {
                learning_rate: bad,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(FitError::Config(_))));
        }
    }

    #[test]
    fn test_workspace_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg_dir = dir.path().join(".trainkit");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            r#"
nb_epoch = 12
metric = "val_accuracy"
first_trainable_layer = "conv_5"

[metrics.val_accuracy]
name = "accuracy"
best_value = "max"

[early_stopping]
patience = 4
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.nb_epoch, 12);
        assert_eq!(config.metric, "val_accuracy");
        assert_eq!(config.first_trainable_layer.as_deref(), Some("conv_5"));
        assert_eq!(config.early_stopping.patience, 4);
        assert_eq!(config.early_stopping.min_delta, 0.001);
        let spec = &config.metrics.unwrap()["val_accuracy"];
        assert_eq!(spec.name, "accuracy");
        assert_eq!(spec.best_value, MonitorMode::Max);
    }

    #[test]
    fn test_toml_rendering_roundtrips_through_figment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("explicit.toml");
        let original = FitConfig {
            nb_epoch: 7,
            learning_rate: 3e-4,
            ..Default::default()
        };
        std::fs::write(&path, to_toml(&original).unwrap()).unwrap();

        let loaded = load_config(None, Some(&path)).unwrap();
        assert_eq!(loaded.nb_epoch, 7);
        assert_eq!(loaded.learning_rate, 3e-4);
    }
}
