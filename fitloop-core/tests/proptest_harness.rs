//! Property-based tests for the harness using proptest.

use proptest::prelude::*;

use fitloop_core::data::Dataset;
use fitloop_core::loss::MseLoss;
use fitloop_core::model::{Linear, StateDict};
use fitloop_core::optim::{Optimizer, Sgd};
use fitloop_core::tensor::Tensor;
use fitloop_core::training::runner::ValidationEpochRunner;
use fitloop_core::training::{
    CheckpointPolicy, CheckpointSink, ConfusionMatrixAccumulator, LrSchedulerDriver, MetricPolicy,
    MetricSource,
};
use fitloop_core::HarnessError;

struct Counting(usize);

impl CheckpointSink for Counting {
    fn persist(&mut self, _state: &StateDict) -> Result<(), HarnessError> {
        self.0 += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".into()
    }
}

// --- Confusion counts ---

proptest! {
    #[test]
    fn confusion_total_matches_sample_count(
        pairs in prop::collection::vec((0usize..2, 0usize..2), 0..200),
        chunk in 1usize..17,
    ) {
        let mut acc = ConfusionMatrixAccumulator::new();
        for batch in pairs.chunks(chunk) {
            let (predicted, actual): (Vec<usize>, Vec<usize>) = batch.iter().copied().unzip();
            acc.update(&predicted, &actual).unwrap();
        }
        let counts = acc.snapshot();
        prop_assert_eq!(counts.total(), pairs.len());

        let correct = pairs.iter().filter(|(p, a)| p == a).count();
        prop_assert_eq!(counts.true_positive + counts.true_negative, correct);
    }

    #[test]
    fn rejected_batch_leaves_counts_untouched(
        good in prop::collection::vec((0usize..2, 0usize..2), 1..50),
        bad_label in 2usize..10,
    ) {
        let mut acc = ConfusionMatrixAccumulator::new();
        let (predicted, actual): (Vec<usize>, Vec<usize>) = good.iter().copied().unzip();
        acc.update(&predicted, &actual).unwrap();
        let before = acc.snapshot();

        prop_assert!(acc.update(&[0, 1], &[1, bad_label]).is_err());
        prop_assert_eq!(acc.snapshot(), before);
    }
}

// --- Weighted mean loss ---

proptest! {
    #[test]
    fn mean_loss_does_not_depend_on_batch_size(
        targets in prop::collection::vec(-10.0f32..10.0, 1..60),
        batch_size in 1usize..20,
    ) {
        let n = targets.len();
        let expected = targets.iter().map(|t| (*t as f64).powi(2)).sum::<f64>() / n as f64;

        let dataset = Dataset::new(
            Tensor::zeros(vec![n, 1]),
            Tensor::new(vec![n, 1], targets).unwrap(),
        ).unwrap();
        let mut loader = dataset.loader(batch_size, false, 0);
        // a zero-initialized layer predicts exactly zero
        let mut model = Linear::zeros(1, 1);
        let policy = MetricPolicy::Regression;
        let metrics = ValidationEpochRunner::new(&policy)
            .run(0, MetricSource::Validation, 0.1, &mut model, &MseLoss, &mut loader)
            .unwrap();

        prop_assert_eq!(metrics.sample_count, n);
        prop_assert!((metrics.mean_loss - expected).abs() <= 1e-6 * expected.max(1.0));
    }
}

// --- Scheduler ---

proptest! {
    #[test]
    fn scheduler_decays_once_per_interval(
        interval in 1usize..10,
        epochs in 0usize..60,
        factor in 0.1f64..1.0,
    ) {
        let mut opt = Sgd::new(1.0, 0.0);
        let mut sched = LrSchedulerDriver::from_optimizer(&opt, interval, factor).unwrap();
        let mut decays = 0;
        for _ in 0..epochs {
            if sched.step(&mut opt).is_some() {
                decays += 1;
            }
        }
        prop_assert_eq!(decays, epochs / interval);
        let expected = factor.powi(decays as i32);
        prop_assert!((sched.current_lr() - expected).abs() < 1e-9);
        prop_assert!((opt.learning_rate() - expected).abs() < 1e-9);
    }
}

// --- Checkpoint policy ---

proptest! {
    #[test]
    fn checkpoint_writes_only_on_strict_improvement(
        metrics in prop::collection::vec(prop::sample::select(vec![0.0, 0.25, 0.5, 0.75, 1.0]), 0..40),
    ) {
        let model = Linear::zeros(1, 1);
        let mut policy = CheckpointPolicy::new(Counting(0));

        let mut best = f64::NEG_INFINITY;
        let mut expected_writes = 0;
        for (epoch, metric) in metrics.iter().enumerate() {
            let saved = policy.consider(epoch, *metric, &model).unwrap();
            prop_assert_eq!(saved.is_some(), *metric > best);
            if *metric > best {
                best = *metric;
                expected_writes += 1;
            }
        }
        prop_assert_eq!(policy.writes(), expected_writes);
        if !metrics.is_empty() {
            prop_assert!(policy.writes() >= 1);
            prop_assert_eq!(policy.best_metric(), best);
        }
    }
}
