//! The model capability the harness drives.

use crate::device::Device;
use crate::error::HarnessError;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether the model is being optimized or evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Train,
    Eval,
}

/// A named trainable tensor together with its accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Tensor,
    pub grad: Tensor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        let grad = Tensor::zeros(value.shape().to_vec());
        Self {
            name: name.into(),
            value,
            grad,
        }
    }
}

/// Self-contained snapshot of every parameter, keyed by name.
///
/// This is exactly what a checkpoint persists: no optimizer or scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDict {
    pub tensors: BTreeMap<String, Tensor>,
}

impl StateDict {
    pub fn from_parameters<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> Self {
        Self {
            tensors: params
                .into_iter()
                .map(|p| (p.name.clone(), p.value.clone()))
                .collect(),
        }
    }

    /// Copy matching tensors into `params`, failing on missing names or shape changes.
    pub fn apply_to(&self, params: &mut [&mut Parameter]) -> Result<(), HarnessError> {
        for param in params.iter_mut() {
            let tensor = self.tensors.get(&param.name).ok_or_else(|| {
                HarnessError::checkpoint(format!("missing parameter '{}'", param.name))
            })?;
            param.value.ensure_same_shape(tensor)?;
            param.value = tensor.clone();
        }
        Ok(())
    }
}

/// A differentiable model.
///
/// `backward` receives the gradient of the loss with respect to the last
/// `forward` output and accumulates parameter gradients.
pub trait Model {
    fn set_mode(&mut self, mode: Mode);

    fn forward(&mut self, input: &Tensor) -> Result<Tensor, HarnessError>;

    fn backward(&mut self, grad_output: &Tensor) -> Result<(), HarnessError>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn state_dict(&self) -> StateDict;

    fn load_state_dict(&mut self, state: &StateDict) -> Result<(), HarnessError> {
        let mut params = self.parameters_mut();
        state.apply_to(&mut params)
    }
}

/// Fully connected layer: `y = x W^T + b` over rows flattened to `in_features`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
    in_features: usize,
    out_features: usize,
    mode: Mode,
    device: Device,
    last_input: Option<Tensor>,
}

impl Linear {
    /// Uniform init in `[-1/sqrt(in), 1/sqrt(in)]`, reproducible from `seed`.
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut layer = Self::zeros(in_features, out_features);
        for w in layer.weight.value.data_mut() {
            *w = rng.gen_range(-bound..=bound);
        }
        layer
    }

    pub fn zeros(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: Parameter::new("weight", Tensor::zeros(vec![out_features, in_features])),
            bias: Parameter::new("bias", Tensor::zeros(vec![out_features])),
            in_features,
            out_features,
            mode: Mode::Train,
            device: Device::Cpu,
            last_input: None,
        }
    }

    /// Place the layer on `device`, failing if this build cannot run there.
    pub fn to_device(mut self, device: Device) -> Result<Self, HarnessError> {
        self.device = device.ensure_available()?;
        Ok(self)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl Model for Linear {
    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor, HarnessError> {
        let rows = input.rows();
        if input.row_len() != self.in_features {
            return Err(HarnessError::shape(
                format!("rows of {} features", self.in_features),
                format!("{:?}", input.shape()),
            ));
        }
        let w = self.weight.value.data();
        let b = self.bias.value.data();
        let mut out = Vec::with_capacity(rows * self.out_features);
        for r in 0..rows {
            let x = input.row(r);
            for o in 0..self.out_features {
                let w_o = &w[o * self.in_features..(o + 1) * self.in_features];
                let dot: f32 = w_o.iter().zip(x).map(|(a, b)| a * b).sum();
                out.push(dot + b[o]);
            }
        }
        self.last_input = match self.mode {
            Mode::Train => Some(input.clone()),
            Mode::Eval => None,
        };
        Tensor::new(vec![rows, self.out_features], out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<(), HarnessError> {
        let input = self
            .last_input
            .as_ref()
            .ok_or_else(|| HarnessError::model("backward called without a training forward pass"))?;
        if grad_output.rows() != input.rows() || grad_output.row_len() != self.out_features {
            return Err(HarnessError::shape(
                format!("[{}, {}]", input.rows(), self.out_features),
                format!("{:?}", grad_output.shape()),
            ));
        }
        let in_features = self.in_features;
        let grad_w = self.weight.grad.data_mut();
        for r in 0..input.rows() {
            let x = input.row(r);
            for (o, g) in grad_output.row(r).iter().enumerate() {
                let row = &mut grad_w[o * in_features..(o + 1) * in_features];
                for (gw, xi) in row.iter_mut().zip(x) {
                    *gw += g * xi;
                }
            }
        }
        let grad_b = self.bias.grad.data_mut();
        for r in 0..grad_output.rows() {
            for (gb, g) in grad_b.iter_mut().zip(grad_output.row(r)) {
                *gb += g;
            }
        }
        Ok(())
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn state_dict(&self) -> StateDict {
        StateDict::from_parameters([&self.weight, &self.bias])
    }
}
