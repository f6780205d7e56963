//! # fitloop-core
//!
//! Epoch-based training and evaluation harness for supervised models.
//!
//! A run is a fixed number of epochs. Each epoch makes one optimization pass
//! and, for batched policies, one evaluation pass; a step-decay schedule
//! adjusts the learning rate and the best model by the monitored metric is
//! checkpointed to a single location. What counts as "the metric" is decided
//! by a [`MetricPolicy`]:
//!
//! - `ClassificationBinary`: accuracy plus confusion counts, validated every epoch
//! - `NodeClassificationMasked`: full-graph training on masked rows, one final test evaluation
//! - `Regression`: loss only
//!
//! Reporting goes through [`TrainingObserver`] implementations; the loop
//! itself never prints.

pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod loss;
pub mod model;
pub mod optim;
pub mod persistence;
pub mod tensor;
pub mod training;

// Re-exports
pub use config::{HarnessConfig, load_config, write_config};
pub use data::{Batch, BatchProvider, Dataset, FullGraphProvider, InMemoryLoader};
pub use device::Device;
pub use error::HarnessError;
pub use loss::{CrossEntropyLoss, Loss, MseLoss};
pub use model::{Linear, Mode, Model, Parameter, StateDict};
pub use optim::{Adam, Optimizer, ParamGroup, Sgd};
pub use tensor::{Mask, Tensor};
pub use training::{
    ExperimentOrchestrator, MetricPolicy, MetricsHistory, RunReport, TrainingObserver,
};
