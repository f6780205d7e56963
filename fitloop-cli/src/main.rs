//! fitloop CLI: run and evaluate training experiments from the terminal.

mod commands;
mod synthetic;

use clap::Parser;
use fitloop_core::device::Device;
use std::path::PathBuf;
use synthetic::ExperimentKind;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// fitloop: epoch-based training and evaluation harness
#[derive(Parser, Debug)]
#[command(name = "fitloop", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress the console report and non-error logs
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Train an experiment for a fixed number of epochs
    Run {
        /// Experiment to run
        #[arg(value_enum)]
        kind: ExperimentKind,

        /// Number of epochs (overrides config)
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Initial learning rate (overrides config)
        #[arg(long = "lr")]
        learning_rate: Option<f64>,

        /// Best-model checkpoint location (overrides config)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Device: cpu, cuda[:N], mps
        #[arg(long)]
        device: Option<Device>,

        /// Write the run report (per-epoch metrics) as JSON
        #[arg(long)]
        history_out: Option<PathBuf>,
    },
    /// Restore a checkpoint and run one evaluation pass
    Evaluate {
        /// Experiment the checkpoint belongs to
        #[arg(value_enum)]
        kind: ExperimentKind,

        /// Checkpoint to restore (defaults to the configured path)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Device: cpu, cuda[:N], mps
        #[arg(long)]
        device: Option<Device>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        #[arg(default_value = "fitloop.toml")]
        path: PathBuf,
    },
    /// Show the resolved configuration
    Show,
}

fn main() -> anyhow::Result<()> {
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

    let log_dir = directories::ProjectDirs::from("dev", "fitloop", "fitloop")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "fitloop.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let global = commands::GlobalOptions {
        config: cli.config,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &global)
}
