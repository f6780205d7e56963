//! Training observers: structured events out of the loop, reporting kept out of it.

use crate::training::checkpoint::CheckpointRecord;
use crate::training::metrics::{EpochMetrics, MetricSource, MetricsHistory};
use std::io::Write;

/// Identifies a run for observers.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_id: String,
    pub policy: &'static str,
    pub epochs: usize,
}

/// Periodic progress inside a training pass.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub epoch: usize,
    pub epochs: usize,
    pub batch_index: usize,
    pub batch_count: usize,
    pub loss: f64,
    /// Accuracy of this batch alone; `None` for regression.
    pub accuracy: Option<f64>,
}

/// Hooks into training events. Every method defaults to a no-op.
pub trait TrainingObserver {
    fn on_run_start(&mut self, _run: &RunInfo) {}

    fn on_batch_progress(&mut self, _progress: &BatchProgress) {}

    /// Called once per completed epoch with the record that goes into the history.
    fn on_epoch_end(&mut self, _metrics: &EpochMetrics) {}

    fn on_lr_decay(&mut self, _epoch: usize, _lr: f64) {}

    fn on_checkpoint_saved(&mut self, _record: &CheckpointRecord) {}

    /// Masked runs only: the single evaluation after the last epoch.
    fn on_final_evaluation(&mut self, _metrics: &EpochMetrics) {}

    fn on_run_end(&mut self, _history: &MetricsHistory) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TrainingObserver for NoopObserver {}

/// Fan-out to several observers, in registration order.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<Box<dyn TrainingObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl TrainingObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl TrainingObserver for ObserverSet {
    fn on_run_start(&mut self, run: &RunInfo) {
        self.observers.iter_mut().for_each(|o| o.on_run_start(run));
    }

    fn on_batch_progress(&mut self, progress: &BatchProgress) {
        self.observers
            .iter_mut()
            .for_each(|o| o.on_batch_progress(progress));
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        self.observers.iter_mut().for_each(|o| o.on_epoch_end(metrics));
    }

    fn on_lr_decay(&mut self, epoch: usize, lr: f64) {
        self.observers.iter_mut().for_each(|o| o.on_lr_decay(epoch, lr));
    }

    fn on_checkpoint_saved(&mut self, record: &CheckpointRecord) {
        self.observers
            .iter_mut()
            .for_each(|o| o.on_checkpoint_saved(record));
    }

    fn on_final_evaluation(&mut self, metrics: &EpochMetrics) {
        self.observers
            .iter_mut()
            .for_each(|o| o.on_final_evaluation(metrics));
    }

    fn on_run_end(&mut self, history: &MetricsHistory) {
        self.observers.iter_mut().for_each(|o| o.on_run_end(history));
    }
}

/// Line-oriented human-readable report. Write failures are ignored.
pub struct ConsoleReporter<W: Write> {
    out: W,
    /// Masked runs print a training line every N epochs.
    epoch_interval: usize,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            epoch_interval: 10,
        }
    }

    pub fn with_epoch_interval(mut self, interval: usize) -> Self {
        self.epoch_interval = interval.max(1);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_confusion_table(&mut self, metrics: &EpochMetrics) {
        let Some(c) = metrics.confusion else {
            return;
        };
        let rows = [
            ("True-Positive (TP)", c.true_positive),
            ("True-Negative (TN)", c.true_negative),
            ("False-Positive (FP)", c.false_positive),
            ("False-Negative (FN)", c.false_negative),
        ];
        let _ = writeln!(self.out, "Validation Statistics:");
        let _ = writeln!(self.out, "-----------------------");
        for (label, count) in rows {
            let _ = writeln!(self.out, "|{label:<25}|{count:>5}|");
        }
        let _ = writeln!(self.out, "-----------------------\n");
    }
}

impl<W: Write> TrainingObserver for ConsoleReporter<W> {
    fn on_batch_progress(&mut self, p: &BatchProgress) {
        let _ = match p.accuracy {
            Some(acc) => writeln!(
                self.out,
                "Epoch {}/{}, Batch {}/{}, Training Loss: {}, Training Accuracy: {}",
                p.epoch, p.epochs, p.batch_index, p.batch_count, p.loss, acc
            ),
            None => writeln!(
                self.out,
                "Epoch {}/{}, Batch {}/{}, Training Loss: {}",
                p.epoch, p.epochs, p.batch_index, p.batch_count, p.loss
            ),
        };
    }

    fn on_epoch_end(&mut self, m: &EpochMetrics) {
        match m.source {
            MetricSource::Validation => {
                let _ = match m.accuracy {
                    Some(acc) => writeln!(
                        self.out,
                        "Epoch {}, Average Validation Loss: {}, Total Validation Accuracy: {}\n",
                        m.epoch, m.mean_loss, acc
                    ),
                    None => writeln!(
                        self.out,
                        "Epoch {}, Average Validation Loss: {}, Worst Validation Loss: {}\n",
                        m.epoch,
                        m.mean_loss,
                        m.worst_batch_loss.unwrap_or(m.mean_loss)
                    ),
                };
                self.write_confusion_table(m);
            }
            MetricSource::Training | MetricSource::Test => {
                if m.epoch % self.epoch_interval == 0 {
                    let _ = writeln!(self.out, "Epoch {:>3} | Loss: {:.2}", m.epoch, m.mean_loss);
                }
            }
        }
    }

    fn on_checkpoint_saved(&mut self, record: &CheckpointRecord) {
        let _ = writeln!(
            self.out,
            "Best Model Saved at Epoch {}\n",
            record.epoch_of_best
        );
    }

    fn on_final_evaluation(&mut self, m: &EpochMetrics) {
        let split = match m.source {
            MetricSource::Validation => "Validation",
            MetricSource::Training => "Training",
            MetricSource::Test => "Test",
        };
        let _ = match m.accuracy {
            Some(acc) => writeln!(self.out, "{split} Accuracy: {acc}"),
            None => writeln!(self.out, "{split} Loss: {}", m.mean_loss),
        };
        self.write_confusion_table(m);
    }

    fn on_run_end(&mut self, _history: &MetricsHistory) {
        let _ = writeln!(self.out, "Training Completed!");
        let _ = self.out.flush();
    }
}

/// Mirrors observer events into `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TrainingObserver for TracingObserver {
    fn on_run_start(&mut self, run: &RunInfo) {
        tracing::info!(
            run_id = %run.run_id,
            policy = run.policy,
            epochs = run.epochs,
            "Run started"
        );
    }

    fn on_batch_progress(&mut self, p: &BatchProgress) {
        tracing::debug!(
            epoch = p.epoch,
            batch = p.batch_index,
            batches = p.batch_count,
            loss = p.loss,
            accuracy = ?p.accuracy,
            "Training progress"
        );
    }

    fn on_epoch_end(&mut self, m: &EpochMetrics) {
        tracing::info!(
            epoch = m.epoch,
            source = ?m.source,
            loss = m.mean_loss,
            accuracy = ?m.accuracy,
            samples = m.sample_count,
            lr = m.learning_rate,
            "Epoch complete"
        );
    }

    fn on_lr_decay(&mut self, epoch: usize, lr: f64) {
        tracing::info!(epoch, lr, "Learning rate decayed");
    }

    fn on_checkpoint_saved(&mut self, record: &CheckpointRecord) {
        tracing::info!(
            epoch = record.epoch_of_best,
            metric = record.best_metric,
            "Checkpoint improved"
        );
    }

    fn on_final_evaluation(&mut self, m: &EpochMetrics) {
        tracing::info!(
            loss = m.mean_loss,
            accuracy = ?m.accuracy,
            samples = m.sample_count,
            "Final evaluation"
        );
    }

    fn on_run_end(&mut self, history: &MetricsHistory) {
        tracing::info!(epochs = history.len(), "Run finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::ConfusionCounts;
    use std::cell::Cell;
    use std::rc::Rc;

    fn validation_metrics() -> EpochMetrics {
        EpochMetrics {
            epoch: 2,
            source: MetricSource::Validation,
            mean_loss: 0.5,
            accuracy: Some(0.6),
            confusion: Some(ConfusionCounts {
                true_positive: 6,
                true_negative: 0,
                false_positive: 4,
                false_negative: 0,
            }),
            sample_count: 10,
            train_loss: Some(0.7),
            worst_batch_loss: None,
            learning_rate: 0.001,
        }
    }

    #[test]
    fn test_console_epoch_report() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.on_epoch_end(&validation_metrics());
        let text = String::from_utf8(reporter.into_inner()).unwrap();

        assert!(text.contains("Epoch 2, Average Validation Loss: 0.5, Total Validation Accuracy: 0.6"));
        assert!(text.contains("|True-Positive (TP)       |    6|"));
        assert!(text.contains("|False-Positive (FP)      |    4|"));
        assert!(text.contains("True-Negative"));
        assert!(text.contains("False-Negative"));
    }

    #[test]
    fn test_console_progress_line() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.on_batch_progress(&BatchProgress {
            epoch: 0,
            epochs: 50,
            batch_index: 10,
            batch_count: 40,
            loss: 0.25,
            accuracy: Some(0.5),
        });
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            text,
            "Epoch 0/50, Batch 10/40, Training Loss: 0.25, Training Accuracy: 0.5\n"
        );
    }

    #[test]
    fn test_console_checkpoint_and_masked_lines() {
        let mut reporter = ConsoleReporter::new(Vec::new()).with_epoch_interval(10);
        let mut training = validation_metrics();
        training.source = MetricSource::Training;
        training.confusion = None;
        training.epoch = 10;
        reporter.on_epoch_end(&training);
        training.epoch = 11;
        reporter.on_epoch_end(&training);
        reporter.on_checkpoint_saved(&CheckpointRecord {
            best_metric: 0.6,
            epoch_of_best: 11,
        });

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.contains("Epoch  10 | Loss: 0.50"));
        assert!(!text.contains("Epoch  11"));
        assert!(text.contains("Best Model Saved at Epoch 11"));
    }

    #[test]
    fn test_final_evaluation_is_labelled_by_source() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.on_final_evaluation(&validation_metrics());
        let mut test = validation_metrics();
        test.source = MetricSource::Test;
        test.confusion = None;
        reporter.on_final_evaluation(&test);
        test.accuracy = None;
        reporter.on_final_evaluation(&test);

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.starts_with("Validation Accuracy: 0.6\n"));
        assert!(text.contains("Validation Statistics:"));
        assert!(text.contains("Test Accuracy: 0.6\n"));
        assert!(text.ends_with("Test Loss: 0.5\n"));
    }

    struct Counter(Rc<Cell<usize>>);

    impl TrainingObserver for Counter {
        fn on_epoch_end(&mut self, _metrics: &EpochMetrics) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_observer_set_fans_out() {
        let seen = Rc::new(Cell::new(0));
        let mut set = ObserverSet::new()
            .with(Counter(seen.clone()))
            .with(NoopObserver)
            .with(Counter(seen.clone()));
        set.on_epoch_end(&validation_metrics());
        assert_eq!(set.len(), 3);
        assert_eq!(seen.get(), 2);
    }
}
