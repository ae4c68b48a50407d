//! Timestamped session folders and their manifests.

use crate::config::FitConfig;
use crate::error::FitError;
use crate::persistence::{atomic_write_json, load_json};
use crate::training::metrics::History;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Folder name format, e.g. `2024-03-01_14-05-09`.
pub const SESSION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const MANIFEST_FILE: &str = "session.json";

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One training run's output folder and artifact paths.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub dir: PathBuf,
    pub started_at: DateTime<Local>,
    pub model_name: String,
    pub monitor: String,
    /// Written by the checkpoint callback.
    pub best_weights: PathBuf,
    /// Written when training is interrupted.
    pub interrupt_weights: PathBuf,
    /// Copy of the logs directory.
    pub logs_copy: PathBuf,
}

impl TrainingSession {
    /// Create `<project_folder>/<now>`.
    pub fn create(
        project_folder: &Path,
        model_name: &str,
        monitor: &str,
    ) -> Result<Self, FitError> {
        Self::create_at(project_folder, model_name, monitor, Local::now())
    }

    /// Create `<project_folder>/<started_at>`. The project folder is created
    /// if missing; the session folder itself must not exist yet.
    pub fn create_at(
        project_folder: &Path,
        model_name: &str,
        monitor: &str,
        started_at: DateTime<Local>,
    ) -> Result<Self, FitError> {
        let dir = project_folder.join(started_at.format(SESSION_TIMESTAMP_FORMAT).to_string());
        tracing::info!(path = %dir.display(), "Current training session folder");
        std::fs::create_dir_all(project_folder)?;
        std::fs::create_dir(&dir)?;

        let basename = format!("{model_name}_best_{monitor}");
        Ok(Self {
            best_weights: dir.join(format!("{basename}.h5")),
            interrupt_weights: dir.join(format!("{basename}_ctrlc.h5")),
            logs_copy: dir.join("logs"),
            dir,
            started_at,
            model_name: model_name.to_string(),
            monitor: monitor.to_string(),
        })
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Write the manifest for the current state of the run.
    pub fn write_manifest(&self, record: &SessionRecord<'_>) -> Result<SessionManifest, FitError> {
        let manifest = SessionManifest {
            status: record.status,
            model: self.model_name.clone(),
            monitor: self.monitor.clone(),
            started_at: self.started_at,
            finished_at: match record.status {
                SessionStatus::Running => None,
                _ => Some(Local::now()),
            },
            weights_path: record.weights_path.map(Path::to_path_buf),
            frozen_layers: record.frozen_layers.to_vec(),
            history: record.history.cloned(),
            config: record.config.cloned(),
            error: record.error.map(str::to_string),
        };
        atomic_write_json(&self.manifest_path(), &manifest)?;
        Ok(manifest)
    }
}

/// Inputs for [`TrainingSession::write_manifest`].
#[derive(Debug, Clone, Copy)]
pub struct SessionRecord<'a> {
    pub status: SessionStatus,
    pub weights_path: Option<&'a Path>,
    pub frozen_layers: &'a [String],
    pub history: Option<&'a History>,
    pub config: Option<&'a FitConfig>,
    pub error: Option<&'a str>,
}

impl<'a> SessionRecord<'a> {
    pub fn new(status: SessionStatus) -> Self {
        Self {
            status,
            weights_path: None,
            frozen_layers: &[],
            history: None,
            config: None,
            error: None,
        }
    }
}

/// `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub status: SessionStatus,
    pub model: String,
    pub monitor: String,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub weights_path: Option<PathBuf>,
    #[serde(default)]
    pub frozen_layers: Vec<String>,
    pub history: Option<History>,
    pub config: Option<FitConfig>,
    pub error: Option<String>,
}

/// A session folder found under a project folder.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub dir: PathBuf,
    pub started: NaiveDateTime,
    /// `None` for folders without a readable manifest.
    pub manifest: Option<SessionManifest>,
}

/// Session folders under `project_folder`, newest first. Entries whose name
/// is not a session timestamp are skipped.
pub fn list_sessions(project_folder: &Path) -> Result<Vec<SessionSummary>, FitError> {
    if !project_folder.exists() {
        return Err(FitError::not_found(format!("project folder {}", project_folder.display())));
    }

    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(project_folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(started) = name
            .to_str()
            .and_then(|n| NaiveDateTime::parse_from_str(n, SESSION_TIMESTAMP_FORMAT).ok())
        else {
            continue;
        };
        let dir = entry.path();
        let manifest = match load_json::<SessionManifest>(&dir.join(MANIFEST_FILE)) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Unreadable session manifest");
                None
            }
        };
        sessions.push(SessionSummary {
            dir,
            started,
            manifest,
        });
    }
    sessions.sort_by(|a, b| b.started.cmp(&a.started));
    Ok(sessions)
}
