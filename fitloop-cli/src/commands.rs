//! CLI subcommand handlers.

use crate::synthetic::{self, ExperimentKind};
use crate::{Commands, ConfigAction};
use fitloop_core::config::{ConfigOverrides, HarnessConfig, OptimizerKind, load_config, write_config};
use fitloop_core::data::BatchProvider;
use fitloop_core::device::Device;
use fitloop_core::loss::Loss;
use fitloop_core::model::Linear;
use fitloop_core::optim::{Adam, Optimizer, Sgd};
use fitloop_core::persistence;
use fitloop_core::training::{
    ConsoleReporter, EpochMetrics, ExperimentOrchestrator, FileCheckpointSink, MetricPolicy,
    MetricSource, ObserverSet, RunReport, TracingObserver, TrainingObserver,
    ValidationEpochRunner, load_checkpoint,
};
use fitloop_core::{HarnessError, Model};
use std::path::PathBuf;

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub quiet: bool,
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, global: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            kind,
            epochs,
            learning_rate,
            checkpoint,
            device,
            history_out,
        } => {
            let overrides = ConfigOverrides {
                epochs,
                learning_rate,
                checkpoint_path: checkpoint,
                device,
            };
            let config = resolve_config(global, &overrides)?;
            let report = handle_run(kind, &config, global.quiet)?;
            if let Some(path) = history_out {
                persistence::atomic_write_json(&path, &report)?;
                tracing::info!(path = %path.display(), "Run report written");
            }
            Ok(())
        }
        Commands::Evaluate {
            kind,
            checkpoint,
            device,
        } => {
            let overrides = ConfigOverrides {
                checkpoint_path: checkpoint,
                device,
                ..Default::default()
            };
            let config = resolve_config(global, &overrides)?;
            handle_evaluate(kind, &config)
        }
        Commands::Config { action } => handle_config(action, global),
    }
}

fn resolve_config(
    global: &GlobalOptions,
    overrides: &ConfigOverrides,
) -> anyhow::Result<HarnessConfig> {
    let config = load_config(global.config.as_deref(), overrides)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;
    Ok(config)
}

/// Build the configured optimizer.
pub fn build_optimizer(config: &HarnessConfig) -> Box<dyn Optimizer> {
    let o = &config.optimizer;
    match o.kind {
        OptimizerKind::Adam => Box::new(Adam::new(
            o.learning_rate,
            o.weight_decay,
            (o.beta1, o.beta2),
        )),
        OptimizerKind::Sgd => Box::new(Sgd::new(o.learning_rate, o.weight_decay)),
    }
}

/// Train `kind` on its synthetic workload and return the run report.
pub fn handle_run(
    kind: ExperimentKind,
    config: &HarnessConfig,
    quiet: bool,
) -> anyhow::Result<RunReport> {
    let device = config.training.device.ensure_available()?;
    let workload = synthetic::build(kind, config)?;
    let model = workload.model.to_device(device)?;
    let sink = FileCheckpointSink::new(&config.checkpoint.path);

    tracing::info!(
        kind = kind.name(),
        %device,
        epochs = config.training.epochs,
        optimizer = ?config.optimizer.kind,
        lr = config.optimizer.learning_rate,
        checkpoint = %config.checkpoint.path.display(),
        "Starting run"
    );

    let mut experiment = ExperimentOrchestrator::new(
        model,
        build_optimizer(config),
        workload.loss,
        workload.policy,
        Box::new(sink),
    )
    .configured(config);

    let mut observers = ObserverSet::new().with(TracingObserver);
    if !quiet {
        observers = observers.with(ConsoleReporter::stdout());
    }

    let mut train = workload.train;
    let report = match workload.validation {
        Some(mut validation) => {
            experiment.run(train.as_mut(), Some(validation.as_mut()), &mut observers)?
        }
        None => experiment.run(train.as_mut(), None, &mut observers)?,
    };

    if let Some(best) = report.best {
        tracing::info!(
            epoch = best.epoch_of_best,
            metric = best.best_metric,
            "Best checkpoint"
        );
    }
    Ok(report)
}

/// Restore the checkpoint for `kind` and run a single evaluation pass.
fn handle_evaluate(kind: ExperimentKind, config: &HarnessConfig) -> anyhow::Result<()> {
    let device: Device = config.training.device.ensure_available()?;
    let workload = synthetic::build(kind, config)?;
    let mut model = workload.model.to_device(device)?;
    let state = load_checkpoint(&config.checkpoint.path)?;
    model.load_state_dict(&state)?;
    tracing::info!(
        kind = kind.name(),
        checkpoint = %config.checkpoint.path.display(),
        "Checkpoint restored"
    );

    let (mut provider, source) = match workload.validation {
        Some(validation) => (validation, MetricSource::Validation),
        None => (workload.train, MetricSource::Test),
    };
    let metrics = evaluate_restored(
        &workload.policy,
        &mut model,
        workload.loss.as_ref(),
        provider.as_mut(),
        source,
    )?;

    println!(
        "{} evaluation: loss {:.4} over {} samples",
        kind.name(),
        metrics.mean_loss,
        metrics.sample_count
    );
    ConsoleReporter::stdout().on_final_evaluation(&metrics);
    Ok(())
}

/// One evaluation pass over a restored model. No optimizer is involved, so
/// the record carries a learning rate of zero.
fn evaluate_restored(
    policy: &MetricPolicy,
    model: &mut Linear,
    loss: &dyn Loss,
    provider: &mut dyn BatchProvider,
    source: MetricSource,
) -> Result<EpochMetrics, HarnessError> {
    ValidationEpochRunner::new(policy).run(0, source, 0.0, model, loss, provider)
}

fn handle_config(action: ConfigAction, global: &GlobalOptions) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { path } => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            write_config(&path, &HarnessConfig::default())?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(global.config.as_deref(), &ConfigOverrides::default())
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
