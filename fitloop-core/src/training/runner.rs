//! Epoch runners: one optimization pass, one evaluation pass.

use crate::data::BatchProvider;
use crate::error::HarnessError;
use crate::loss::Loss;
use crate::model::{Mode, Model};
use crate::optim::Optimizer;
use crate::training::callbacks::{BatchProgress, TrainingObserver};
use crate::training::metrics::{EpochMetrics, MetricSource};
use crate::training::policy::{MetricPolicy, Phase};

/// Position of an epoch inside a run, for progress events.
#[derive(Debug, Clone, Copy)]
pub struct EpochIndex {
    pub epoch: usize,
    pub epochs: usize,
}

fn check_finite(loss: f64, epoch: usize, batch: usize) -> Result<f64, HarnessError> {
    if loss.is_finite() {
        Ok(loss)
    } else {
        Err(HarnessError::NonFiniteLoss {
            epoch,
            batch,
            value: loss,
        })
    }
}

/// Runs exactly one optimization pass over a batch provider.
pub struct TrainingEpochRunner<'p> {
    policy: &'p MetricPolicy,
    log_interval: usize,
}

impl<'p> TrainingEpochRunner<'p> {
    pub fn new(policy: &'p MetricPolicy, log_interval: usize) -> Self {
        Self {
            policy,
            log_interval: log_interval.max(1),
        }
    }

    /// For every batch: forward, loss over the policy's training rows, clear
    /// gradients, backward, one optimizer step.
    ///
    /// Returns the training record for the epoch. Any failure aborts the pass
    /// as-is; a non-finite loss aborts before the optimizer sees it.
    pub fn run<M, O, L>(
        &self,
        at: EpochIndex,
        model: &mut M,
        optimizer: &mut O,
        loss_fn: &L,
        batches: &mut dyn BatchProvider,
        observer: &mut dyn TrainingObserver,
    ) -> Result<EpochMetrics, HarnessError>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
        L: Loss + ?Sized,
    {
        let learning_rate = optimizer.learning_rate();
        let batch_count = batches.batch_count();
        let mut acc = self.policy.accumulator(Phase::Train);
        model.set_mode(Mode::Train);

        for (index, batch) in batches.batches().enumerate() {
            let batch = batch?;
            let prediction = model.forward(&batch.inputs)?;
            let selection = self
                .policy
                .select(Phase::Train, &prediction, &batch.targets)?;
            let output = loss_fn.forward(&selection.prediction, &selection.target)?;
            let loss = check_finite(output.value, at.epoch, index)?;
            let grad = selection.expand_grad(output.grad)?;

            optimizer.zero_grad(&mut model.parameters_mut());
            model.backward(&grad)?;
            optimizer.step(&mut model.parameters_mut())?;

            let outcome = acc.record(loss, &selection)?;
            if index % self.log_interval == 0 {
                observer.on_batch_progress(&BatchProgress {
                    epoch: at.epoch,
                    epochs: at.epochs,
                    batch_index: index,
                    batch_count,
                    loss,
                    accuracy: outcome.accuracy,
                });
            }
        }

        let mut metrics = acc.finish(at.epoch, MetricSource::Training, learning_rate, "training")?;
        metrics.train_loss = Some(metrics.mean_loss);
        Ok(metrics)
    }
}

/// Runs exactly one evaluation pass: no backward, no optimizer.
pub struct ValidationEpochRunner<'p> {
    policy: &'p MetricPolicy,
}

impl<'p> ValidationEpochRunner<'p> {
    pub fn new(policy: &'p MetricPolicy) -> Self {
        Self { policy }
    }

    /// Evaluate every batch exactly once. The record is only produced after
    /// the whole provider has been consumed.
    pub fn run<M, L>(
        &self,
        epoch: usize,
        source: MetricSource,
        learning_rate: f64,
        model: &mut M,
        loss_fn: &L,
        batches: &mut dyn BatchProvider,
    ) -> Result<EpochMetrics, HarnessError>
    where
        M: Model + ?Sized,
        L: Loss + ?Sized,
    {
        let mut acc = self.policy.accumulator(Phase::Evaluate);
        model.set_mode(Mode::Eval);

        for (index, batch) in batches.batches().enumerate() {
            let batch = batch?;
            let prediction = model.forward(&batch.inputs)?;
            let selection = self
                .policy
                .select(Phase::Evaluate, &prediction, &batch.targets)?;
            let output = loss_fn.forward(&selection.prediction, &selection.target)?;
            let loss = check_finite(output.value, epoch, index)?;
            acc.record(loss, &selection)?;
        }

        let split = match source {
            MetricSource::Test => "test",
            _ => "validation",
        };
        acc.finish(epoch, source, learning_rate, split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Batch, Dataset, InMemoryLoader};
    use crate::loss::{CrossEntropyLoss, MseLoss};
    use crate::model::{Parameter, StateDict};
    use crate::optim::Sgd;
    use crate::tensor::Tensor;
    use crate::training::callbacks::NoopObserver;

    /// Emits fixed logits regardless of input and counts calls.
    struct FixedLogits {
        logits: Vec<f32>,
        bias: Parameter,
        mode: Option<Mode>,
        backward_calls: usize,
    }

    impl FixedLogits {
        fn new(logits: Vec<f32>) -> Self {
            let width = logits.len();
            Self {
                logits,
                bias: Parameter::new("bias", Tensor::zeros(vec![width])),
                mode: None,
                backward_calls: 0,
            }
        }
    }

    impl Model for FixedLogits {
        fn set_mode(&mut self, mode: Mode) {
            self.mode = Some(mode);
        }

        fn forward(&mut self, input: &Tensor) -> Result<Tensor, HarnessError> {
            let n = input.rows();
            let width = self.logits.len();
            let data = (0..n)
                .flat_map(|_| self.logits.iter().zip(self.bias.value.data()).map(|(l, b)| l + b))
                .collect();
            Tensor::new(vec![n, width], data)
        }

        fn backward(&mut self, grad_output: &Tensor) -> Result<(), HarnessError> {
            self.backward_calls += 1;
            let width = self.logits.len();
            let grad = self.bias.grad.data_mut();
            for r in 0..grad_output.rows() {
                for c in 0..width {
                    grad[c] += grad_output.row(r)[c];
                }
            }
            Ok(())
        }

        fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
            vec![&mut self.bias]
        }

        fn state_dict(&self) -> StateDict {
            StateDict::from_parameters([&self.bias])
        }
    }

    /// Returns a NaN loss on the given batch index.
    struct PoisonedLoss {
        at: usize,
        calls: std::cell::Cell<usize>,
    }

    impl Loss for PoisonedLoss {
        fn forward(
            &self,
            prediction: &Tensor,
            target: &Tensor,
        ) -> Result<crate::loss::LossOutput, HarnessError> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            let mut out = CrossEntropyLoss.forward(prediction, target)?;
            if call == self.at {
                out.value = f64::NAN;
            }
            Ok(out)
        }

        fn name(&self) -> &'static str {
            "poisoned"
        }
    }

    fn labelled(labels: &[f32], batch_size: usize) -> InMemoryLoader {
        let n = labels.len();
        let inputs = Tensor::zeros(vec![n, 1]);
        let targets = Tensor::from_vec(labels.to_vec());
        Dataset::new(inputs, targets)
            .unwrap()
            .loader(batch_size, false, 0)
    }

    struct Recorder(Vec<BatchProgress>);

    impl TrainingObserver for Recorder {
        fn on_batch_progress(&mut self, progress: &BatchProgress) {
            self.0.push(progress.clone());
        }
    }

    #[test]
    fn test_training_pass_steps_every_batch() {
        let policy = MetricPolicy::ClassificationBinary;
        let mut model = FixedLogits::new(vec![0.0, 0.0]);
        let mut opt = Sgd::new(0.1, 0.0);
        let mut loader = labelled(&[0.0; 25], 1);
        let mut recorder = Recorder(Vec::new());

        let metrics = TrainingEpochRunner::new(&policy, 10)
            .run(
                EpochIndex { epoch: 0, epochs: 1 },
                &mut model,
                &mut opt,
                &CrossEntropyLoss,
                &mut loader,
                &mut recorder,
            )
            .unwrap();

        assert_eq!(model.backward_calls, 25);
        assert_eq!(model.mode, Some(Mode::Train));
        // logit for class 0 grows, class 1 shrinks
        assert!(model.bias.value.data()[0] > 0.0);
        assert_eq!(metrics.sample_count, 25);
        assert_eq!(metrics.source, MetricSource::Training);
        assert_eq!(metrics.confusion, None);

        let indices: Vec<usize> = recorder.0.iter().map(|p| p.batch_index).collect();
        assert_eq!(indices, vec![0, 10, 20]);
        assert!(recorder.0.iter().all(|p| p.batch_count == 25));
    }

    #[test]
    fn test_training_aborts_on_non_finite_loss() {
        let policy = MetricPolicy::ClassificationBinary;
        let mut model = FixedLogits::new(vec![0.0, 0.0]);
        let mut opt = Sgd::new(0.1, 0.0);
        let mut loader = labelled(&[0.0, 1.0, 0.0, 1.0], 1);
        let loss = PoisonedLoss {
            at: 2,
            calls: Default::default(),
        };

        let err = TrainingEpochRunner::new(&policy, 10)
            .run(
                EpochIndex { epoch: 3, epochs: 5 },
                &mut model,
                &mut opt,
                &loss,
                &mut loader,
                &mut NoopObserver,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::NonFiniteLoss {
                epoch: 3,
                batch: 2,
                ..
            }
        ));
        assert_eq!(model.backward_calls, 2);
    }

    #[test]
    fn test_training_empty_set_fails_fast() {
        let policy = MetricPolicy::Regression;
        let mut model = FixedLogits::new(vec![0.0]);
        let mut opt = Sgd::new(0.1, 0.0);
        let mut loader = labelled(&[], 4);

        let err = TrainingEpochRunner::new(&policy, 10)
            .run(
                EpochIndex { epoch: 0, epochs: 1 },
                &mut model,
                &mut opt,
                &MseLoss,
                &mut loader,
                &mut NoopObserver,
            )
            .unwrap_err();
        assert!(matches!(err, HarnessError::EmptyDataset { split: "training" }));
    }

    #[test]
    fn test_validation_constant_class_zero() {
        let policy = MetricPolicy::ClassificationBinary;
        let mut model = FixedLogits::new(vec![1.0, 0.0]);
        let labels = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut loader = labelled(&labels, 3);

        let metrics = ValidationEpochRunner::new(&policy)
            .run(
                0,
                MetricSource::Validation,
                0.1,
                &mut model,
                &CrossEntropyLoss,
                &mut loader,
            )
            .unwrap();

        let confusion = metrics.confusion.unwrap();
        assert_eq!(metrics.accuracy, Some(0.6));
        assert_eq!(confusion.true_positive, 6);
        assert_eq!(confusion.false_positive, 4);
        assert_eq!(confusion.true_negative, 0);
        assert_eq!(confusion.false_negative, 0);
        assert_eq!(confusion.total(), metrics.sample_count);
        assert_eq!(model.backward_calls, 0);
        assert_eq!(model.mode, Some(Mode::Eval));
    }

    #[test]
    fn test_validation_does_not_touch_parameters() {
        let policy = MetricPolicy::ClassificationBinary;
        let mut model = FixedLogits::new(vec![0.3, 0.1]);
        let before = model.state_dict();
        let mut loader = labelled(&[0.0, 1.0, 1.0], 2);
        ValidationEpochRunner::new(&policy)
            .run(
                0,
                MetricSource::Validation,
                0.1,
                &mut model,
                &CrossEntropyLoss,
                &mut loader,
            )
            .unwrap();
        assert_eq!(model.state_dict(), before);
    }

    #[test]
    fn test_validation_rejects_three_class_logits() {
        let policy = MetricPolicy::ClassificationBinary;
        let mut model = FixedLogits::new(vec![1.0, 0.0, 0.0]);
        let mut batches = SingleBatch(Some(Batch::new(
            Tensor::zeros(vec![2, 1]),
            Tensor::from_vec(vec![0.0, 2.0]),
        )));
        let err = ValidationEpochRunner::new(&policy)
            .run(
                0,
                MetricSource::Validation,
                0.1,
                &mut model,
                &CrossEntropyLoss,
                &mut batches,
            )
            .unwrap_err();
        assert!(matches!(err, HarnessError::ShapeMismatch { .. }));
    }

    struct SingleBatch(Option<Batch>);

    impl BatchProvider for SingleBatch {
        fn batch_count(&self) -> usize {
            1
        }

        fn sample_count(&self) -> usize {
            self.0.as_ref().map(|b| b.size()).unwrap_or(0)
        }

        fn batches(
            &mut self,
        ) -> Box<dyn Iterator<Item = Result<Batch, HarnessError>> + '_> {
            Box::new(self.0.clone().into_iter().map(Ok))
        }
    }
}
