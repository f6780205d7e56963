//! Experiment orchestration: the fixed-length epoch loop.

use crate::config::HarnessConfig;
use crate::data::BatchProvider;
use crate::error::HarnessError;
use crate::loss::Loss;
use crate::model::Model;
use crate::optim::Optimizer;
use crate::training::callbacks::{RunInfo, TrainingObserver};
use crate::training::checkpoint::{CheckpointPolicy, CheckpointRecord, CheckpointSink};
use crate::training::metrics::{EpochMetrics, MetricSource, MetricsHistory};
use crate::training::policy::MetricPolicy;
use crate::training::runner::{EpochIndex, TrainingEpochRunner, ValidationEpochRunner};
use crate::training::scheduler::{LrSchedulerDriver, SchedulerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step-decay settings; the driver itself is created fresh for every run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecay {
    pub interval: usize,
    pub decay_factor: f64,
}

/// Everything a finished run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub policy: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One record per completed epoch, in epoch order.
    pub history: MetricsHistory,
    /// Masked runs only: the single test-mask evaluation.
    pub final_evaluation: Option<EpochMetrics>,
    /// Best checkpoint written during the run, if any.
    pub best: Option<CheckpointRecord>,
    pub scheduler: Option<SchedulerState>,
}

/// Sequences training, validation, learning-rate decay and checkpointing
/// for a fixed number of epochs.
///
/// The epoch count is the only terminal condition. Errors from any
/// collaborator end the run and are returned unchanged.
pub struct ExperimentOrchestrator<M, O, L> {
    model: M,
    optimizer: O,
    loss: L,
    policy: MetricPolicy,
    sink: Box<dyn CheckpointSink>,
    epochs: usize,
    log_interval: usize,
    schedule: Option<StepDecay>,
}

impl<M, O, L> ExperimentOrchestrator<M, O, L>
where
    M: Model,
    O: Optimizer,
    L: Loss,
{
    pub fn new(
        model: M,
        optimizer: O,
        loss: L,
        policy: MetricPolicy,
        sink: Box<dyn CheckpointSink>,
    ) -> Self {
        Self {
            model,
            optimizer,
            loss,
            policy,
            sink,
            epochs: 0,
            log_interval: 10,
            schedule: None,
        }
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_log_interval(mut self, interval: usize) -> Self {
        self.log_interval = interval.max(1);
        self
    }

    pub fn with_schedule(mut self, schedule: Option<StepDecay>) -> Self {
        self.schedule = schedule;
        self
    }

    /// Apply epochs, log interval and schedule from a loaded configuration.
    pub fn configured(self, config: &HarnessConfig) -> Self {
        let schedule = config.scheduler.enabled.then_some(StepDecay {
            interval: config.scheduler.interval,
            decay_factor: config.scheduler.decay_factor,
        });
        self.with_epochs(config.training.epochs)
            .with_log_interval(config.training.log_interval)
            .with_schedule(schedule)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn policy(&self) -> &MetricPolicy {
        &self.policy
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Rejects inputs that cannot complete a run, before any epoch starts.
    fn check_inputs(
        &self,
        train: &dyn BatchProvider,
        validation: Option<&dyn BatchProvider>,
    ) -> Result<(), HarnessError> {
        if train.sample_count() == 0 {
            return Err(HarnessError::EmptyDataset { split: "training" });
        }
        match &self.policy {
            MetricPolicy::NodeClassificationMasked {
                train_mask,
                test_mask,
            } => {
                if train.batch_count() != 1 {
                    return Err(HarnessError::PolicyMismatch(format!(
                        "{} trains on one full-graph batch, provider yields {}",
                        self.policy.name(),
                        train.batch_count()
                    )));
                }
                if train_mask.count() == 0 {
                    return Err(HarnessError::EmptyDataset { split: "train-mask" });
                }
                if test_mask.count() == 0 {
                    return Err(HarnessError::EmptyDataset { split: "test-mask" });
                }
            }
            _ => match validation {
                None => return Err(HarnessError::MissingValidation(self.policy.name())),
                Some(v) if v.sample_count() == 0 => {
                    return Err(HarnessError::EmptyDataset { split: "validation" });
                }
                Some(_) => {}
            },
        }
        Ok(())
    }

    /// Run the experiment.
    ///
    /// Batched policies validate on `validation` after every epoch and
    /// require it. The masked policy trains on the single graph batch of
    /// `train` and evaluates once at the end, on `validation` when given and
    /// on `train` otherwise.
    ///
    /// Empty training or validation sets and empty masks are rejected before
    /// the first epoch, so a failed run leaves the model untouched.
    pub fn run(
        &mut self,
        train: &mut dyn BatchProvider,
        validation: Option<&mut dyn BatchProvider>,
        observer: &mut dyn TrainingObserver,
    ) -> Result<RunReport, HarnessError> {
        self.check_inputs(train, validation.as_deref())?;
        let run = RunInfo {
            run_id: uuid::Uuid::new_v4().to_string(),
            policy: self.policy.name(),
            epochs: self.epochs,
        };
        let started_at = Utc::now();
        tracing::info!(
            run_id = %run.run_id,
            policy = run.policy,
            epochs = self.epochs,
            train_samples = train.sample_count(),
            "Starting experiment"
        );
        observer.on_run_start(&run);

        let mut scheduler = self
            .schedule
            .map(|s| LrSchedulerDriver::from_optimizer(&self.optimizer, s.interval, s.decay_factor))
            .transpose()?;
        let mut checkpoints = CheckpointPolicy::new(self.sink.as_mut());

        let (history, final_evaluation) = if self.policy.is_masked() {
            let mut history = MetricsHistory::new();
            for epoch in 0..self.epochs {
                let at = EpochIndex {
                    epoch,
                    epochs: self.epochs,
                };
                let metrics = TrainingEpochRunner::new(&self.policy, self.log_interval).run(
                    at,
                    &mut self.model,
                    &mut self.optimizer,
                    &self.loss,
                    train,
                    observer,
                )?;
                observer.on_epoch_end(&metrics);
                if let Some(lr) = scheduler.as_mut().and_then(|s| s.step(&mut self.optimizer)) {
                    observer.on_lr_decay(epoch, lr);
                }
                history.push(metrics);
            }

            let evaluation = match self.epochs.checked_sub(1) {
                None => None,
                Some(last) => {
                    let provider: &mut dyn BatchProvider = match validation {
                        Some(v) => v,
                        None => train,
                    };
                    let lr = self.optimizer.learning_rate();
                    let metrics = ValidationEpochRunner::new(&self.policy).run(
                        last,
                        MetricSource::Test,
                        lr,
                        &mut self.model,
                        &self.loss,
                        provider,
                    )?;
                    observer.on_final_evaluation(&metrics);
                    if let Some(value) = self.policy.monitored_value(&metrics) {
                        if let Some(record) = checkpoints.consider(last, value, &self.model)? {
                            observer.on_checkpoint_saved(&record);
                        }
                    }
                    Some(metrics)
                }
            };
            (history, evaluation)
        } else {
            let validation = validation.ok_or(HarnessError::MissingValidation(self.policy.name()))?;
            let mut history = MetricsHistory::new();
            for epoch in 0..self.epochs {
                let at = EpochIndex {
                    epoch,
                    epochs: self.epochs,
                };
                let train_metrics = TrainingEpochRunner::new(&self.policy, self.log_interval)
                    .run(
                        at,
                        &mut self.model,
                        &mut self.optimizer,
                        &self.loss,
                        train,
                        observer,
                    )?;
                let mut metrics = ValidationEpochRunner::new(&self.policy).run(
                    epoch,
                    MetricSource::Validation,
                    train_metrics.learning_rate,
                    &mut self.model,
                    &self.loss,
                    validation,
                )?;
                metrics.train_loss = Some(train_metrics.mean_loss);
                observer.on_epoch_end(&metrics);

                if let Some(lr) = scheduler.as_mut().and_then(|s| s.step(&mut self.optimizer)) {
                    observer.on_lr_decay(epoch, lr);
                }
                if let Some(value) = self.policy.monitored_value(&metrics) {
                    if let Some(record) = checkpoints.consider(epoch, value, &self.model)? {
                        observer.on_checkpoint_saved(&record);
                    }
                }
                history.push(metrics);
            }
            (history, None)
        };

        observer.on_run_end(&history);
        let report = RunReport {
            run_id: run.run_id,
            policy: run.policy.to_string(),
            started_at,
            finished_at: Utc::now(),
            history,
            final_evaluation,
            best: checkpoints.record(),
            scheduler: scheduler.map(|s| s.state()),
        };
        tracing::info!(
            run_id = %report.run_id,
            epochs = report.history.len(),
            best_epoch = ?report.best.map(|b| b.epoch_of_best),
            checkpoint_writes = checkpoints.writes(),
            "Experiment finished"
        );
        Ok(report)
    }
}
