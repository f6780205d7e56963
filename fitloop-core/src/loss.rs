//! Loss functions: scalar value plus gradient with respect to the prediction.

use crate::error::HarnessError;
use crate::tensor::Tensor;

/// A loss value and its gradient with respect to the prediction that produced it.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Mean loss over the samples in the batch.
    pub value: f64,
    pub grad: Tensor,
}

pub trait Loss {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<LossOutput, HarnessError>;

    fn name(&self) -> &'static str;
}

impl<T: Loss + ?Sized> Loss for Box<T> {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<LossOutput, HarnessError> {
        (**self).forward(prediction, target)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Softmax cross-entropy over `[n, classes]` logits against `[n]` class indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl Loss for CrossEntropyLoss {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<LossOutput, HarnessError> {
        let n = prediction.rows();
        let classes = prediction.row_len();
        if prediction.shape().len() != 2 || target.len() != n {
            return Err(HarnessError::shape(
                format!("logits [n, c] with {} targets", target.len()),
                format!("{:?}", prediction.shape()),
            ));
        }
        if n == 0 {
            return Err(HarnessError::EmptyDataset { split: "loss" });
        }
        let labels = target.class_labels()?;

        let mut total = 0.0f64;
        let mut grad = Vec::with_capacity(prediction.len());
        for (r, &label) in labels.iter().enumerate() {
            if label >= classes {
                return Err(HarnessError::InvalidLabel {
                    row: r,
                    label: label as f32,
                    reason: "class index exceeds logit width",
                });
            }
            let row = prediction.row(r);
            let max = row.iter().fold(f32::NEG_INFINITY, |m, v| m.max(*v)) as f64;
            let exps: Vec<f64> = row.iter().map(|v| (*v as f64 - max).exp()).collect();
            let sum: f64 = exps.iter().sum();
            total -= (exps[label] / sum).ln();
            for (c, e) in exps.iter().enumerate() {
                let onehot = if c == label { 1.0 } else { 0.0 };
                grad.push(((e / sum - onehot) / n as f64) as f32);
            }
        }

        Ok(LossOutput {
            value: total / n as f64,
            grad: Tensor::new(prediction.shape().to_vec(), grad)?,
        })
    }

    fn name(&self) -> &'static str {
        "cross_entropy"
    }
}

/// Mean squared error over every element.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl Loss for MseLoss {
    fn forward(&self, prediction: &Tensor, target: &Tensor) -> Result<LossOutput, HarnessError> {
        prediction.ensure_same_shape(target)?;
        if prediction.is_empty() {
            return Err(HarnessError::EmptyDataset { split: "loss" });
        }
        let len = prediction.len() as f64;
        let mut total = 0.0f64;
        let grad: Vec<f32> = prediction
            .data()
            .iter()
            .zip(target.data())
            .map(|(p, t)| {
                let diff = (*p - *t) as f64;
                total += diff * diff;
                (2.0 * diff / len) as f32
            })
            .collect();

        Ok(LossOutput {
            value: total / len,
            grad: Tensor::new(prediction.shape().to_vec(), grad)?,
        })
    }

    fn name(&self) -> &'static str {
        "mse"
    }
}
