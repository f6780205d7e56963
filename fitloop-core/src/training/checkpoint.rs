//! Best-model checkpointing.

use crate::error::HarnessError;
use crate::model::{Model, StateDict};
use crate::persistence;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The best monitored value seen so far and the epoch that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub best_metric: f64,
    pub epoch_of_best: usize,
}

/// Somewhere a parameter snapshot can be persisted.
pub trait CheckpointSink {
    fn persist(&mut self, state: &StateDict) -> Result<(), HarnessError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

impl<T: CheckpointSink + ?Sized> CheckpointSink for &mut T {
    fn persist(&mut self, state: &StateDict) -> Result<(), HarnessError> {
        (**self).persist(state)
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

impl<T: CheckpointSink + ?Sized> CheckpointSink for Box<T> {
    fn persist(&mut self, state: &StateDict) -> Result<(), HarnessError> {
        (**self).persist(state)
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

/// Writes the snapshot as JSON to a single fixed path, replacing the previous one.
///
/// The write goes through a temp file and a rename, so the fixed path always
/// holds either the previous snapshot or the new one in full.
#[derive(Debug, Clone)]
pub struct FileCheckpointSink {
    path: PathBuf,
}

impl FileCheckpointSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointSink for FileCheckpointSink {
    fn persist(&mut self, state: &StateDict) -> Result<(), HarnessError> {
        let blob = serde_json::to_vec(state)?;
        let digest = format!("{:x}", Sha256::digest(&blob));
        persistence::atomic_write(&self.path, &blob).map_err(|e| {
            HarnessError::checkpoint(format!("failed to write {}: {e}", self.path.display()))
        })?;
        tracing::debug!(
            path = %self.path.display(),
            bytes = blob.len(),
            sha256 = %digest,
            "Checkpoint written"
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read a snapshot written by [`FileCheckpointSink`].
pub fn load_checkpoint(path: &Path) -> Result<StateDict, HarnessError> {
    persistence::load_json(path)
        .map_err(|e| HarnessError::checkpoint(format!("failed to read {}: {e}", path.display())))?
        .ok_or_else(|| HarnessError::checkpoint(format!("no checkpoint at {}", path.display())))
}

/// Persists a snapshot whenever the monitored value strictly improves.
///
/// Ties never write, so the earliest epoch reaching a value is the one kept.
/// The record only advances after the sink reports success.
pub struct CheckpointPolicy<S: CheckpointSink> {
    sink: S,
    record: Option<CheckpointRecord>,
    writes: usize,
}

impl<S: CheckpointSink> CheckpointPolicy<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            record: None,
            writes: 0,
        }
    }

    /// Best value so far; negative infinity before the first save.
    pub fn best_metric(&self) -> f64 {
        self.record
            .map(|r| r.best_metric)
            .unwrap_or(f64::NEG_INFINITY)
    }

    pub fn record(&self) -> Option<CheckpointRecord> {
        self.record
    }

    /// Number of snapshots persisted by this policy.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Compare `metric` with the best so far and persist `model` on strict improvement.
    ///
    /// Returns the new record when a snapshot was written.
    pub fn consider<M: Model + ?Sized>(
        &mut self,
        epoch: usize,
        metric: f64,
        model: &M,
    ) -> Result<Option<CheckpointRecord>, HarnessError> {
        if !metric.is_finite() {
            return Err(HarnessError::NonFiniteMetric {
                epoch,
                value: metric,
            });
        }
        if metric <= self.best_metric() {
            tracing::debug!(epoch, metric, best = self.best_metric(), "No improvement");
            return Ok(None);
        }

        self.sink.persist(&model.state_dict())?;
        self.writes += 1;
        let record = CheckpointRecord {
            best_metric: metric,
            epoch_of_best: epoch,
        };
        self.record = Some(record);
        tracing::info!(
            epoch,
            metric,
            location = %self.sink.location(),
            "Best model saved"
        );
        Ok(Some(record))
    }
}
