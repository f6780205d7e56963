//! Synthetic workloads for the three experiment kinds.
//!
//! Each workload is generated deterministically from the configured seed, so
//! `fitloop evaluate` sees exactly the split a previous `fitloop run` trained on.

use fitloop_core::config::HarnessConfig;
use fitloop_core::data::{BatchProvider, Dataset, FullGraphProvider};
use fitloop_core::loss::{CrossEntropyLoss, Loss, MseLoss};
use fitloop_core::model::Linear;
use fitloop_core::tensor::{Mask, Tensor};
use fitloop_core::training::MetricPolicy;
use fitloop_core::HarnessError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Which experiment to run.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    /// Binary classification of flattened 4x4x4 volume patches
    PatchClassifier,
    /// Four-class node classification on a single masked graph
    GraphNodes,
    /// 2x upsampling of 4x4 images to 8x8, trained as regression
    SuperResolution,
}

impl ExperimentKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PatchClassifier => "patch-classifier",
            Self::GraphNodes => "graph-nodes",
            Self::SuperResolution => "super-resolution",
        }
    }
}

const PATCH_SIDE: usize = 4;
const PATCH_COUNT: usize = 480;
const GRAPH_NODES: usize = 300;
const GRAPH_FEATURES: usize = 16;
const GRAPH_CLASSES: usize = 4;
const LOW_RES: usize = 4;
const IMAGE_COUNT: usize = 320;

/// Everything a run needs besides the optimizer and the checkpoint sink.
pub struct Workload {
    pub model: Linear,
    pub loss: Box<dyn Loss>,
    pub policy: MetricPolicy,
    pub train: Box<dyn BatchProvider>,
    /// `None` for the masked graph, which evaluates on `train` with its test mask.
    pub validation: Option<Box<dyn BatchProvider>>,
}

pub fn build(kind: ExperimentKind, config: &HarnessConfig) -> Result<Workload, HarnessError> {
    let t = &config.training;
    let mut rng = StdRng::seed_from_u64(t.seed);
    let workload = match kind {
        ExperimentKind::PatchClassifier => {
            let dataset = patches(&mut rng)?;
            let features = dataset.inputs().row_len();
            let (train, validation) = dataset.random_split(t.train_split, t.seed)?;
            Workload {
                model: Linear::new(features, 2, t.seed),
                loss: Box::new(CrossEntropyLoss),
                policy: MetricPolicy::ClassificationBinary,
                train: Box::new(train.loader(t.batch_size, true, t.seed)),
                validation: Some(Box::new(validation.loader(t.batch_size, false, t.seed))),
            }
        }
        ExperimentKind::GraphNodes => {
            let (graph, policy) = graph(&mut rng, t.train_split)?;
            Workload {
                model: Linear::new(GRAPH_FEATURES, GRAPH_CLASSES, t.seed),
                loss: Box::new(CrossEntropyLoss),
                policy,
                train: Box::new(graph),
                validation: None,
            }
        }
        ExperimentKind::SuperResolution => {
            let dataset = images(&mut rng)?;
            let (train, validation) = dataset.random_split(t.train_split, t.seed)?;
            let high = LOW_RES * 2;
            Workload {
                model: Linear::new(LOW_RES * LOW_RES, high * high, t.seed),
                loss: Box::new(MseLoss),
                policy: MetricPolicy::Regression,
                train: Box::new(train.loader(t.batch_size, true, t.seed)),
                validation: Some(Box::new(validation.loader(t.batch_size, false, t.seed))),
            }
        }
    };
    tracing::debug!(
        kind = kind.name(),
        policy = workload.policy.name(),
        train_samples = workload.train.sample_count(),
        "Workload generated"
    );
    Ok(workload)
}

/// Patches are noisy volumes whose mean intensity separates the classes.
fn patches(rng: &mut StdRng) -> Result<Dataset, HarnessError> {
    let voxels = PATCH_SIDE.pow(3);
    let mut inputs = Vec::with_capacity(PATCH_COUNT * voxels);
    let mut labels = Vec::with_capacity(PATCH_COUNT);
    for i in 0..PATCH_COUNT {
        let class = i % 2;
        let center = if class == 0 { 0.35 } else { 0.65 };
        inputs.extend((0..voxels).map(|_| center + rng.gen_range(-0.3f32..0.3)));
        labels.push(class as f32);
    }
    Dataset::new(
        Tensor::new(vec![PATCH_COUNT, voxels], inputs)?,
        Tensor::from_vec(labels),
    )
}

/// Node features cluster around a per-class prototype; masks split nodes at random.
fn graph(rng: &mut StdRng, train_split: f64) -> Result<(FullGraphProvider, MetricPolicy), HarnessError> {
    let prototypes: Vec<Vec<f32>> = (0..GRAPH_CLASSES)
        .map(|_| (0..GRAPH_FEATURES).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect();

    let mut features = Vec::with_capacity(GRAPH_NODES * GRAPH_FEATURES);
    let mut labels = Vec::with_capacity(GRAPH_NODES);
    for node in 0..GRAPH_NODES {
        let class = node % GRAPH_CLASSES;
        features.extend(
            prototypes[class]
                .iter()
                .map(|p| p + rng.gen_range(-0.5f32..0.5)),
        );
        labels.push(class as f32);
    }

    let mut order: Vec<usize> = (0..GRAPH_NODES).collect();
    order.shuffle(rng);
    let cut = (train_split * GRAPH_NODES as f64).floor() as usize;
    let mut train_mask = vec![false; GRAPH_NODES];
    let mut test_mask = vec![true; GRAPH_NODES];
    for &node in &order[..cut] {
        train_mask[node] = true;
        test_mask[node] = false;
    }

    let provider = FullGraphProvider::new(
        Tensor::new(vec![GRAPH_NODES, GRAPH_FEATURES], features)?,
        Tensor::from_vec(labels),
    )?;
    let policy = MetricPolicy::NodeClassificationMasked {
        train_mask: Mask::from(train_mask),
        test_mask: Mask::from(test_mask),
    };
    Ok((provider, policy))
}

/// Low-resolution inputs with their nearest-neighbour 2x upsampled targets.
fn images(rng: &mut StdRng) -> Result<Dataset, HarnessError> {
    let high = LOW_RES * 2;
    let mut inputs = Vec::with_capacity(IMAGE_COUNT * LOW_RES * LOW_RES);
    let mut targets = Vec::with_capacity(IMAGE_COUNT * high * high);
    for _ in 0..IMAGE_COUNT {
        let low: Vec<f32> = (0..LOW_RES * LOW_RES)
            .map(|_| rng.gen_range(0.0f32..1.0))
            .collect();
        for y in 0..high {
            for x in 0..high {
                targets.push(low[(y / 2) * LOW_RES + x / 2]);
            }
        }
        inputs.extend(low);
    }
    Dataset::new(
        Tensor::new(vec![IMAGE_COUNT, LOW_RES * LOW_RES], inputs)?,
        Tensor::new(vec![IMAGE_COUNT, high * high], targets)?,
    )
}
