//! Batches and batch providers.

use crate::error::HarnessError;
use crate::tensor::Tensor;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// One chunk of paired inputs and targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Tensor,
    pub targets: Tensor,
}

impl Batch {
    pub fn new(inputs: Tensor, targets: Tensor) -> Self {
        Self { inputs, targets }
    }

    /// Sample count (first dimension of the inputs).
    pub fn size(&self) -> usize {
        self.inputs.rows()
    }
}

/// A finite, restartable sequence of batches.
///
/// Every call to [`BatchProvider::batches`] starts a fresh pass. Whether the
/// pass is reshuffled is up to the provider.
pub trait BatchProvider {
    fn batch_count(&self) -> usize;

    fn sample_count(&self) -> usize;

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch, HarnessError>> + '_>;
}

/// Paired inputs and targets held in memory.
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Tensor,
    targets: Tensor,
}

impl Dataset {
    pub fn new(inputs: Tensor, targets: Tensor) -> Result<Self, HarnessError> {
        if inputs.rows() != targets.rows() {
            return Err(HarnessError::shape(
                format!("{} target rows", inputs.rows()),
                format!("{} target rows", targets.rows()),
            ));
        }
        Ok(Self { inputs, targets })
    }

    pub fn len(&self) -> usize {
        self.inputs.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    pub fn targets(&self) -> &Tensor {
        &self.targets
    }

    /// Randomly partition into `(first, rest)` with `floor(fraction * len)` rows in `first`.
    pub fn random_split(&self, fraction: f64, seed: u64) -> Result<(Self, Self), HarnessError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(HarnessError::config(format!(
                "split fraction must be within [0, 1], got {fraction}"
            )));
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let cut = (fraction * self.len() as f64).floor() as usize;
        let (head, tail) = order.split_at(cut);
        Ok((self.subset(head)?, self.subset(tail)?))
    }

    fn subset(&self, rows: &[usize]) -> Result<Self, HarnessError> {
        Ok(Self {
            inputs: self.inputs.select_rows(rows)?,
            targets: self.targets.select_rows(rows)?,
        })
    }

    pub fn loader(self, batch_size: usize, shuffle: bool, seed: u64) -> InMemoryLoader {
        InMemoryLoader::new(self, batch_size, shuffle, seed)
    }
}

/// Mini-batch loader over an in-memory [`Dataset`].
///
/// The final batch is smaller when the batch size does not divide the sample count.
#[derive(Debug)]
pub struct InMemoryLoader {
    dataset: Dataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl InMemoryLoader {
    pub fn new(dataset: Dataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }
}

impl BatchProvider for InMemoryLoader {
    fn batch_count(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn sample_count(&self) -> usize {
        self.dataset.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch, HarnessError>> + '_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let dataset = &self.dataset;
        let chunks: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();
        Box::new(chunks.into_iter().map(move |rows| {
            Ok(Batch::new(
                dataset.inputs.select_rows(&rows)?,
                dataset.targets.select_rows(&rows)?,
            ))
        }))
    }
}

/// A whole graph served as a single batch.
///
/// Row selection for training and testing happens through the masks carried
/// by the masked metric policy, not here.
#[derive(Debug, Clone)]
pub struct FullGraphProvider {
    features: Tensor,
    labels: Tensor,
}

impl FullGraphProvider {
    pub fn new(features: Tensor, labels: Tensor) -> Result<Self, HarnessError> {
        if features.rows() != labels.rows() {
            return Err(HarnessError::shape(
                format!("{} node labels", features.rows()),
                format!("{} node labels", labels.rows()),
            ));
        }
        Ok(Self { features, labels })
    }

    pub fn node_count(&self) -> usize {
        self.features.rows()
    }
}

impl BatchProvider for FullGraphProvider {
    fn batch_count(&self) -> usize {
        1
    }

    fn sample_count(&self) -> usize {
        self.node_count()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Batch, HarnessError>> + '_> {
        Box::new(std::iter::once(Ok(Batch::new(
            self.features.clone(),
            self.labels.clone(),
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Dataset {
        let inputs = Tensor::new(vec![n, 1], (0..n).map(|i| i as f32).collect()).unwrap();
        let targets = Tensor::from_vec((0..n).map(|i| i as f32).collect());
        Dataset::new(inputs, targets).unwrap()
    }

    #[test]
    fn test_loader_uneven_final_batch() {
        let mut loader = dataset(7).loader(3, false, 0);
        assert_eq!(loader.batch_count(), 3);
        let sizes: Vec<usize> = loader.batches().map(|b| b.unwrap().size()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_loader_shuffle_keeps_pairs() {
        let mut loader = dataset(10).loader(4, true, 7);
        let mut seen = Vec::new();
        for batch in loader.batches() {
            let batch = batch.unwrap();
            assert_eq!(batch.inputs.data(), batch.targets.data());
            seen.extend_from_slice(batch.targets.data());
        }
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_loader_restarts() {
        let mut loader = dataset(5).loader(2, false, 0);
        assert_eq!(loader.batches().count(), 3);
        assert_eq!(loader.batches().count(), 3);
    }

    #[test]
    fn test_random_split_sizes() {
        let (train, valid) = dataset(10).random_split(0.9, 1).unwrap();
        assert_eq!(train.len(), 9);
        assert_eq!(valid.len(), 1);
        assert!(dataset(10).random_split(1.5, 1).is_err());
    }

    #[test]
    fn test_dataset_rejects_mismatched_rows() {
        let inputs = Tensor::zeros(vec![3, 2]);
        let targets = Tensor::zeros(vec![2]);
        assert!(Dataset::new(inputs, targets).is_err());
    }

    #[test]
    fn test_full_graph_single_batch() {
        let features = Tensor::zeros(vec![4, 3]);
        let labels = Tensor::from_vec(vec![0.0, 1.0, 2.0, 3.0]);
        let mut graph = FullGraphProvider::new(features, labels).unwrap();
        assert_eq!(graph.batch_count(), 1);
        let batches: Vec<_> = graph.batches().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].as_ref().unwrap().size(), 4);
    }
}
