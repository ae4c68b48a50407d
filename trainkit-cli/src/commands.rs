//! CLI subcommand handlers.

use crate::Commands;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use trainkit_core::FitConfig;
use trainkit_core::config::to_toml;
use trainkit_core::training::WarmupCosineSchedule;
use trainkit_core::training::session::{SessionSummary, list_sessions};
use trainkit_core::training::timing::format_elapsed;

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    config: &FitConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Config => {
            println!("{}", to_toml(config)?);
            Ok(())
        }
        Commands::Schedule {
            steps_per_epoch,
            epochs,
            lr,
            every,
            json,
        } => {
            let schedule = WarmupCosineSchedule::for_run(
                lr.unwrap_or(config.learning_rate),
                steps_per_epoch,
                epochs.unwrap_or(config.nb_epoch),
                &config.warmup,
            )?;
            if json {
                println!("{}", schedule_json(&schedule, every)?);
            } else {
                print!("{}", render_schedule(&schedule, every));
            }
            Ok(())
        }
        Commands::Sessions { project } => {
            let project = resolve(
                workspace,
                project.unwrap_or_else(|| config.project_folder.clone()),
            );
            let sessions = list_sessions(&project)
                .with_context(|| format!("Failed to list sessions in {}", project.display()))?;
            if sessions.is_empty() {
                println!("No sessions in {}", project.display());
            } else {
                print!("{}", render_sessions(&sessions));
            }
            Ok(())
        }
        Commands::Elapsed { seconds } => {
            println!("{}", format_elapsed(seconds));
            Ok(())
        }
    }
}

fn resolve(workspace: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        workspace.join(path)
    }
}

fn render_schedule(schedule: &WarmupCosineSchedule, every: usize) -> String {
    let mut out = format!(
        "warmup_steps: {}\ntotal_steps: {}\n",
        schedule.warmup_steps, schedule.total_steps
    );
    for (step, rate) in schedule.sample(every) {
        let _ = writeln!(out, "{step:>8}  {rate:.6e}");
    }
    out
}

fn schedule_json(schedule: &WarmupCosineSchedule, every: usize) -> anyhow::Result<String> {
    let samples: Vec<_> = schedule
        .sample(every)
        .into_iter()
        .map(|(step, rate)| serde_json::json!({ "step": step, "learning_rate": rate }))
        .collect();
    let value = serde_json::json!({
        "schedule": schedule,
        "samples": samples,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

fn render_sessions(sessions: &[SessionSummary]) -> String {
    let mut out = String::new();
    for session in sessions {
        let name = session
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match &session.manifest {
            Some(manifest) => {
                let epochs = manifest
                    .history
                    .as_ref()
                    .map(|h| h.epochs_completed)
                    .unwrap_or(0);
                let weights = manifest
                    .weights_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(
                    out,
                    "{name}  {:<11}  {}  epochs={epochs}  {weights}",
                    manifest.status.to_string(),
                    manifest.model,
                );
            }
            None => {
                let _ = writeln!(out, "{name}  {:<11}", "unknown");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use trainkit_core::config::WarmupConfig;

    #[test]
    fn test_render_schedule_reports_step_counts() {
        let schedule =
            WarmupCosineSchedule::for_run(1e-3, 10, 5, &WarmupConfig::default()).unwrap();
        let out = render_schedule(&schedule, 10);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "warmup_steps: 30");
        assert_eq!(lines[1], "total_steps: 50");
        // Steps 0, 10, 20, 30, 40, 50.
        assert_eq!(lines.len(), 2 + 6);
        assert!(lines[2].trim_start().starts_with("0 "));
    }

    #[test]
    fn test_schedule_json_has_samples() {
        let schedule = WarmupCosineSchedule::for_run(1e-3, 4, 2, &WarmupConfig::default()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&schedule_json(&schedule, 4).unwrap()).unwrap();
        assert_eq!(value["schedule"]["warmup_steps"], 4);
        assert_eq!(value["samples"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_resolve_relative_to_workspace() {
        let ws = Path::new("/work");
        assert_eq!(resolve(ws, PathBuf::from("project")), PathBuf::from("/work/project"));
        assert_eq!(resolve(ws, PathBuf::from("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_render_sessions_without_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("2024-01-02_03-04-05")).unwrap();
        let sessions = list_sessions(dir.path()).unwrap();
        assert_eq!(render_sessions(&sessions).trim_end(), "2024-01-02_03-04-05  unknown");
    }
}
