//! Metric policies: which rows count, what gets measured, what gets monitored.

use crate::error::HarnessError;
use crate::tensor::{Mask, Tensor};
use crate::training::metrics::{ConfusionMatrixAccumulator, EpochMetrics, MetricSource};
use std::borrow::Cow;

/// Whether rows are being selected for an optimization pass or an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Evaluate,
}

/// How per-batch predictions and targets turn into epoch-level metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricPolicy {
    /// Two-class classification, validated every epoch, with confusion counts.
    ClassificationBinary,
    /// Single-graph node classification: one full-graph batch, loss and accuracy
    /// restricted to `train_mask` rows while training and to `test_mask` rows in
    /// the single final evaluation.
    NodeClassificationMasked { train_mask: Mask, test_mask: Mask },
    /// Dense regression; loss only, no accuracy.
    Regression,
}

impl MetricPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClassificationBinary => "classification_binary",
            Self::NodeClassificationMasked { .. } => "node_classification_masked",
            Self::Regression => "regression",
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, Self::NodeClassificationMasked { .. })
    }

    fn is_classification(&self) -> bool {
        !matches!(self, Self::Regression)
    }

    fn active_mask(&self, phase: Phase) -> Option<&Mask> {
        match (self, phase) {
            (Self::NodeClassificationMasked { train_mask, .. }, Phase::Train) => Some(train_mask),
            (Self::NodeClassificationMasked { test_mask, .. }, Phase::Evaluate) => {
                Some(test_mask)
            }
            _ => None,
        }
    }

    /// Restrict a batch to the rows that count in `phase`.
    pub fn select<'a>(
        &self,
        phase: Phase,
        prediction: &'a Tensor,
        target: &'a Tensor,
    ) -> Result<Selection<'a>, HarnessError> {
        let total_rows = prediction.rows();
        if target.rows() != total_rows {
            return Err(HarnessError::shape(
                format!("{total_rows} target rows"),
                format!("{} target rows", target.rows()),
            ));
        }

        let Some(mask) = self.active_mask(phase) else {
            return Ok(Selection {
                prediction: Cow::Borrowed(prediction),
                target: Cow::Borrowed(target),
                rows: None,
                total_rows,
            });
        };

        if mask.len() != total_rows {
            return Err(HarnessError::shape(
                format!("mask over {total_rows} rows"),
                format!("mask over {} rows", mask.len()),
            ));
        }
        let rows = mask.indices();
        if rows.is_empty() {
            return Err(HarnessError::EmptyDataset {
                split: match phase {
                    Phase::Train => "train-mask",
                    Phase::Evaluate => "test-mask",
                },
            });
        }
        Ok(Selection {
            prediction: Cow::Owned(prediction.select_rows(&rows)?),
            target: Cow::Owned(target.select_rows(&rows)?),
            rows: Some(rows),
            total_rows,
        })
    }

    /// Value compared by the checkpoint policy; higher is better.
    ///
    /// Classification policies monitor accuracy. Regression monitors the
    /// negated mean loss so the lowest-loss epoch is the one retained.
    pub fn monitored_value(&self, metrics: &EpochMetrics) -> Option<f64> {
        match self {
            Self::Regression => Some(-metrics.mean_loss),
            _ => metrics.accuracy,
        }
    }

    pub(crate) fn accumulator(&self, phase: Phase) -> EpochAccumulator {
        let track_confusion =
            matches!(self, Self::ClassificationBinary) && phase == Phase::Evaluate;
        EpochAccumulator {
            binary: matches!(self, Self::ClassificationBinary),
            classification: self.is_classification(),
            track_worst: matches!(self, Self::Regression),
            confusion: track_confusion.then(ConfusionMatrixAccumulator::new),
            loss_sum: 0.0,
            samples: 0,
            correct: 0,
            worst_batch_loss: None,
        }
    }
}

/// The rows of one batch that participate in loss and metrics.
#[derive(Debug)]
pub struct Selection<'a> {
    pub prediction: Cow<'a, Tensor>,
    pub target: Cow<'a, Tensor>,
    rows: Option<Vec<usize>>,
    total_rows: usize,
}

impl Selection<'_> {
    /// Number of participating samples.
    pub fn size(&self) -> usize {
        self.prediction.rows()
    }

    /// Map a gradient over the selected rows back onto the full batch.
    /// Rows outside the selection receive zero gradient.
    pub fn expand_grad(&self, grad: Tensor) -> Result<Tensor, HarnessError> {
        match &self.rows {
            None => Ok(grad),
            Some(rows) => Tensor::scatter_rows(&grad, rows, self.total_rows),
        }
    }
}

/// Per-batch contribution, reported to progress observers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchOutcome {
    pub accuracy: Option<f64>,
}

/// Running totals for one pass under one policy.
#[derive(Debug)]
pub(crate) struct EpochAccumulator {
    binary: bool,
    classification: bool,
    track_worst: bool,
    confusion: Option<ConfusionMatrixAccumulator>,
    loss_sum: f64,
    samples: usize,
    correct: usize,
    worst_batch_loss: Option<f64>,
}

impl EpochAccumulator {
    pub fn record(
        &mut self,
        batch_loss: f64,
        selection: &Selection<'_>,
    ) -> Result<BatchOutcome, HarnessError> {
        let size = selection.size();
        let mut accuracy = None;

        if self.classification {
            if self.binary && selection.prediction.row_len() != 2 {
                return Err(HarnessError::shape(
                    "[n, 2] binary logits",
                    format!("{:?}", selection.prediction.shape()),
                ));
            }
            let predicted = selection.prediction.argmax_rows();
            let actual = selection.target.class_labels()?;
            if predicted.len() != actual.len() {
                return Err(HarnessError::shape(
                    format!("{} labels", predicted.len()),
                    format!("{} labels", actual.len()),
                ));
            }
            if let Some(confusion) = self.confusion.as_mut() {
                confusion.update(&predicted, &actual)?;
            }
            let correct = predicted.iter().zip(&actual).filter(|(p, a)| p == a).count();
            self.correct += correct;
            if size > 0 {
                accuracy = Some(correct as f64 / size as f64);
            }
        }

        if self.track_worst {
            self.worst_batch_loss = Some(match self.worst_batch_loss {
                Some(worst) => worst.max(batch_loss),
                None => batch_loss,
            });
        }

        self.loss_sum += batch_loss * size as f64;
        self.samples += size;
        Ok(BatchOutcome { accuracy })
    }

    pub fn finish(
        self,
        epoch: usize,
        source: MetricSource,
        learning_rate: f64,
        split: &'static str,
    ) -> Result<EpochMetrics, HarnessError> {
        if self.samples == 0 {
            return Err(HarnessError::EmptyDataset { split });
        }
        let n = self.samples as f64;
        Ok(EpochMetrics {
            epoch,
            source,
            mean_loss: self.loss_sum / n,
            accuracy: self.classification.then(|| self.correct as f64 / n),
            confusion: self.confusion.map(|c| c.snapshot()),
            sample_count: self.samples,
            train_loss: None,
            worst_batch_loss: self.worst_batch_loss,
            learning_rate,
        })
    }
}
