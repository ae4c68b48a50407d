//! Checkpoint manifest for a training session.

use crate::error::FitError;
use crate::persistence::{atomic_write_json, load_json};
use crate::training::metrics::MonitorMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A saved model file and the monitored value that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    /// 1-based epoch.
    pub epoch: usize,
    pub monitor: String,
    pub value: f64,
    pub path: PathBuf,
    /// SHA-256 of the file contents at save time.
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// `checkpoints.json` inside a session folder.
#[derive(Debug, Clone)]
pub struct CheckpointManifest {
    manifest_path: PathBuf,
    max_entries: usize,
}

impl CheckpointManifest {
    pub fn new(session_dir: &Path, max_entries: usize) -> Self {
        Self {
            manifest_path: session_dir.join("checkpoints.json"),
            max_entries: max_entries.max(1),
        }
    }

    pub fn list(&self) -> Result<Vec<Checkpoint>, FitError> {
        Ok(load_json(&self.manifest_path)?.unwrap_or_default())
    }

    /// Best entry under `mode`.
    pub fn best(&self, mode: MonitorMode) -> Result<Option<Checkpoint>, FitError> {
        let checkpoints = self.list()?;
        let ordering = |a: &Checkpoint, b: &Checkpoint| {
            a.value
                .partial_cmp(&b.value)
                .unwrap_or(std::cmp::Ordering::Equal)
        };
        Ok(match mode {
            MonitorMode::Min => checkpoints.into_iter().min_by(ordering),
            MonitorMode::Max => checkpoints.into_iter().max_by(ordering),
        })
    }

    /// Hash the file at `path` and append an entry.
    pub fn record(
        &self,
        epoch: usize,
        monitor: &str,
        value: f64,
        path: &Path,
    ) -> Result<Checkpoint, FitError> {
        let (hash, size_bytes) = if path.is_file() {
            let mut hasher = Sha256::new();
            let mut file = std::fs::File::open(path)?;
            let size_bytes = std::io::copy(&mut file, &mut hasher)?;
            (format!("{:x}", hasher.finalize()), size_bytes)
        } else {
            // Backends may save a directory instead of a single file.
            (String::new(), 0)
        };

        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            epoch,
            monitor: monitor.to_string(),
            value,
            path: path.to_path_buf(),
            hash,
            size_bytes,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list()?;
        checkpoints.push(checkpoint.clone());
        while checkpoints.len() > self.max_entries {
            checkpoints.remove(0);
        }
        atomic_write_json(&self.manifest_path, &checkpoints)?;

        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_hashes_file() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("net_best_val_loss.h5");
        std::fs::write(&weights, b"weights").unwrap();

        let manifest = CheckpointManifest::new(dir.path(), 10);
        let cp = manifest.record(1, "val_loss", 0.7, &weights).unwrap();

        assert_eq!(cp.size_bytes, 7);
        assert_eq!(cp.hash, format!("{:x}", Sha256::digest(b"weights")));
        assert_eq!(cp.hash.len(), 64);
        assert_eq!(manifest.list().unwrap().len(), 1);
    }

    #[test]
    fn test_record_streams_large_file() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("net_best_val_loss.h5");
        let contents: Vec<u8> = (0..(1 << 20) + 3).map(|i| (i % 251) as u8).collect();
        std::fs::write(&weights, &contents).unwrap();

        let manifest = CheckpointManifest::new(dir.path(), 10);
        let cp = manifest.record(4, "val_loss", 0.2, &weights).unwrap();

        assert_eq!(cp.size_bytes, contents.len() as u64);
        assert_eq!(cp.hash, format!("{:x}", Sha256::digest(&contents)));
    }

    #[test]
    fn test_best_by_mode() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("w.h5");
        std::fs::write(&weights, b"x").unwrap();
        let manifest = CheckpointManifest::new(dir.path(), 10);
        manifest.record(1, "val_accuracy", 0.6, &weights).unwrap();
        manifest.record(2, "val_accuracy", 0.8, &weights).unwrap();
        manifest.record(3, "val_accuracy", 0.7, &weights).unwrap();

        assert_eq!(manifest.best(MonitorMode::Max).unwrap().unwrap().epoch, 2);
        assert_eq!(manifest.best(MonitorMode::Min).unwrap().unwrap().epoch, 1);
    }

    #[test]
    fn test_max_entries_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("w.h5");
        std::fs::write(&weights, b"x").unwrap();
        let manifest = CheckpointManifest::new(dir.path(), 2);
        for epoch in 1..=3 {
            manifest.record(epoch, "val_loss", 1.0 / epoch as f64, &weights).unwrap();
        }
        let epochs: Vec<usize> = manifest.list().unwrap().iter().map(|c| c.epoch).collect();
        assert_eq!(epochs, vec![2, 3]);
    }
}
