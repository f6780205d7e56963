//! Epoch-level metric records and the binary confusion counter.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};

/// Which pass produced an [`EpochMetrics`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    Training,
    Validation,
    Test,
}

/// Outcome counts under the fixed two-class labeling: class 0 is "condition
/// present", class 1 is "condition absent".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn total(&self) -> usize {
        self.true_positive + self.true_negative + self.false_positive + self.false_negative
    }
}

/// Counts TP/TN/FP/FN across the batches of one validation pass.
///
/// TP = predicted 0 & actual 0, TN = predicted 1 & actual 1,
/// FP = predicted 0 & actual 1, FN = predicted 1 & actual 0.
#[derive(Debug, Clone, Default)]
pub struct ConfusionMatrixAccumulator {
    counts: ConfusionCounts,
}

impl ConfusionMatrixAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.counts = ConfusionCounts::default();
    }

    /// Add one batch of predicted and actual class indices.
    ///
    /// The batch is validated before any counter moves, so a rejected batch
    /// leaves the accumulator untouched.
    pub fn update(&mut self, predicted: &[usize], actual: &[usize]) -> Result<(), HarnessError> {
        if predicted.len() != actual.len() {
            return Err(HarnessError::shape(
                format!("{} predictions", actual.len()),
                format!("{} predictions", predicted.len()),
            ));
        }
        for (row, (&p, &a)) in predicted.iter().zip(actual).enumerate() {
            if a > 1 {
                return Err(HarnessError::InvalidLabel {
                    row,
                    label: a as f32,
                    reason: "binary classification expects labels 0 or 1",
                });
            }
            if p > 1 {
                return Err(HarnessError::InvalidLabel {
                    row,
                    label: p as f32,
                    reason: "binary classification expects predictions 0 or 1",
                });
            }
        }

        let mut delta = ConfusionCounts::default();
        for (&p, &a) in predicted.iter().zip(actual) {
            match (p, a) {
                (0, 0) => delta.true_positive += 1,
                (1, 1) => delta.true_negative += 1,
                (0, _) => delta.false_positive += 1,
                _ => delta.false_negative += 1,
            }
        }
        self.counts.true_positive += delta.true_positive;
        self.counts.true_negative += delta.true_negative;
        self.counts.false_positive += delta.false_positive;
        self.counts.false_negative += delta.false_negative;
        Ok(())
    }

    pub fn snapshot(&self) -> ConfusionCounts {
        self.counts
    }
}

/// Metrics for one completed epoch (or for the final masked evaluation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub source: MetricSource,
    /// Sample-weighted mean of the per-batch losses.
    pub mean_loss: f64,
    /// Fraction of correct predictions; `None` for regression.
    pub accuracy: Option<f64>,
    /// Only populated for binary classification evaluations.
    pub confusion: Option<ConfusionCounts>,
    pub sample_count: usize,
    /// Mean training loss of the same epoch, when this record is a validation record.
    pub train_loss: Option<f64>,
    /// Largest single-batch loss; regression only.
    pub worst_batch_loss: Option<f64>,
    /// Learning rate in effect while the epoch ran.
    pub learning_rate: f64,
}

/// Ordered per-epoch metrics, in epoch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsHistory {
    epochs: Vec<EpochMetrics>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EpochMetrics> {
        self.epochs.iter()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn as_slice(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    /// Mean loss per epoch, ready for a loss curve.
    pub fn losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|m| m.mean_loss).collect()
    }

    /// Accuracy per epoch; empty for regression runs.
    pub fn accuracies(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|m| m.accuracy).collect()
    }
}

impl<'a> IntoIterator for &'a MetricsHistory {
    type Item = &'a EpochMetrics;
    type IntoIter = std::slice::Iter<'a, EpochMetrics>;

    fn into_iter(self) -> Self::IntoIter {
        self.epochs.iter()
    }
}
