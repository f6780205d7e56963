//! Training loop: policies, epoch runners, scheduling, checkpoints and the orchestrator.

pub mod callbacks;
pub mod checkpoint;
pub mod experiment;
pub mod metrics;
pub mod policy;
pub mod runner;
pub mod scheduler;

pub use callbacks::{ConsoleReporter, NoopObserver, ObserverSet, TracingObserver, TrainingObserver};
pub use checkpoint::{CheckpointPolicy, CheckpointRecord, CheckpointSink, FileCheckpointSink, load_checkpoint};
pub use experiment::{ExperimentOrchestrator, RunReport, StepDecay};
pub use metrics::{ConfusionCounts, ConfusionMatrixAccumulator, EpochMetrics, MetricSource, MetricsHistory};
pub use policy::{MetricPolicy, Phase};
pub use runner::{EpochIndex, TrainingEpochRunner, ValidationEpochRunner};
pub use scheduler::{LrSchedulerDriver, SchedulerState};
