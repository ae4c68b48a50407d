//! trainkit CLI: inspect configuration, preview learning-rate schedules and
//! browse training sessions.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// trainkit: training-session orchestration
#[derive(Parser, Debug)]
#[command(name = "trainkit", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,
    /// Preview the warm-up cosine learning-rate schedule
    Schedule {
        /// Batches per epoch
        #[arg(long)]
        steps_per_epoch: usize,
        /// Number of epochs (defaults to the configured nb_epoch)
        #[arg(long)]
        epochs: Option<usize>,
        /// Base learning rate (defaults to the configured learning_rate)
        #[arg(long)]
        lr: Option<f64>,
        /// Print every K-th step
        #[arg(long, default_value = "1")]
        every: usize,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List training sessions, newest first
    Sessions {
        /// Project folder (defaults to the configured project_folder)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },
    /// Format a training duration the way a finished run reports it
    Elapsed {
        /// Duration in seconds
        seconds: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "trainkit", "trainkit")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "trainkit.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = trainkit_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    tracing::debug!(workspace = %workspace.display(), "Loaded configuration");

    commands::handle_command(cli.command, &config, &workspace)
}
