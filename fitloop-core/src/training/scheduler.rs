//! Step-decay learning-rate schedule.

use crate::error::HarnessError;
use crate::optim::Optimizer;
use serde::{Deserialize, Serialize};

/// Epochs stepped so far and the rate currently applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub epoch_count: usize,
    pub current_lr: f64,
}

/// Multiplies the learning rate by `decay_factor` every `interval` epochs.
///
/// No warm restarts, no plateau detection.
#[derive(Debug, Clone)]
pub struct LrSchedulerDriver {
    state: SchedulerState,
    interval: usize,
    decay_factor: f64,
}

impl LrSchedulerDriver {
    pub fn new(initial_lr: f64, interval: usize, decay_factor: f64) -> Result<Self, HarnessError> {
        if interval == 0 {
            return Err(HarnessError::config("scheduler interval must be > 0"));
        }
        if !(decay_factor.is_finite() && decay_factor > 0.0) {
            return Err(HarnessError::config(format!(
                "scheduler decay factor must be positive, got {decay_factor}"
            )));
        }
        if !initial_lr.is_finite() {
            return Err(HarnessError::config(format!(
                "initial learning rate must be finite, got {initial_lr}"
            )));
        }
        Ok(Self {
            state: SchedulerState {
                epoch_count: 0,
                current_lr: initial_lr,
            },
            interval,
            decay_factor,
        })
    }

    /// Start from the optimizer's current (first group) learning rate.
    pub fn from_optimizer<O: Optimizer + ?Sized>(
        optimizer: &O,
        interval: usize,
        decay_factor: f64,
    ) -> Result<Self, HarnessError> {
        Self::new(optimizer.learning_rate(), interval, decay_factor)
    }

    pub fn current_lr(&self) -> f64 {
        self.state.current_lr
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Advance one epoch. On an interval boundary the decayed rate is written
    /// into every parameter group and returned.
    pub fn step<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Option<f64> {
        self.state.epoch_count += 1;
        if self.state.epoch_count % self.interval != 0 {
            return None;
        }
        self.state.current_lr *= self.decay_factor;
        for group in optimizer.param_groups_mut() {
            group.lr = self.state.current_lr;
        }
        tracing::debug!(
            epoch_count = self.state.epoch_count,
            lr = self.state.current_lr,
            "Learning rate decayed"
        );
        Some(self.state.current_lr)
    }
}
