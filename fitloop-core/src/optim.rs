//! Optimizers with learning-rate parameter groups.
//!
//! Parameter groups are what the step-decay scheduler rewrites; each group
//! claims the parameters whose names start with its prefix (the empty prefix
//! claims everything not claimed earlier).

use crate::error::HarnessError;
use crate::model::Parameter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hyperparameters shared by a set of parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    #[serde(default)]
    pub prefix: String,
    pub lr: f64,
    #[serde(default)]
    pub weight_decay: f64,
}

impl ParamGroup {
    pub fn new(lr: f64, weight_decay: f64) -> Self {
        Self {
            prefix: String::new(),
            lr,
            weight_decay,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

fn group_for<'a>(groups: &'a [ParamGroup], name: &str) -> Option<&'a ParamGroup> {
    groups.iter().find(|g| name.starts_with(&g.prefix))
}

pub trait Optimizer {
    /// Clear accumulated gradients.
    fn zero_grad(&mut self, params: &mut [&mut Parameter]) {
        for p in params.iter_mut() {
            p.grad.data_mut().fill(0.0);
        }
    }

    /// Apply one update from the current gradients.
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<(), HarnessError>;

    fn param_groups(&self) -> &[ParamGroup];

    fn param_groups_mut(&mut self) -> &mut [ParamGroup];

    /// Learning rate of the first group.
    fn learning_rate(&self) -> f64 {
        self.param_groups().first().map(|g| g.lr).unwrap_or(0.0)
    }
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn zero_grad(&mut self, params: &mut [&mut Parameter]) {
        (**self).zero_grad(params)
    }

    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<(), HarnessError> {
        (**self).step(params)
    }

    fn param_groups(&self) -> &[ParamGroup] {
        (**self).param_groups()
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        (**self).param_groups_mut()
    }

    fn learning_rate(&self) -> f64 {
        (**self).learning_rate()
    }
}

/// Plain stochastic gradient descent with L2 weight decay.
#[derive(Debug, Clone)]
pub struct Sgd {
    groups: Vec<ParamGroup>,
}

impl Sgd {
    pub fn new(lr: f64, weight_decay: f64) -> Self {
        Self::with_groups(vec![ParamGroup::new(lr, weight_decay)])
    }

    pub fn with_groups(groups: Vec<ParamGroup>) -> Self {
        Self { groups }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<(), HarnessError> {
        for p in params.iter_mut() {
            let Some(group) = group_for(&self.groups, &p.name) else {
                continue;
            };
            let (lr, wd) = (group.lr as f32, group.weight_decay as f32);
            let grads = p.grad.data().to_vec();
            for (w, g) in p.value.data_mut().iter_mut().zip(grads) {
                *w -= lr * (g + wd * *w);
            }
        }
        Ok(())
    }

    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }
}

/// Adam with coupled (L2) weight decay.
#[derive(Debug, Clone)]
pub struct Adam {
    groups: Vec<ParamGroup>,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: u64,
    moments: HashMap<String, (Vec<f64>, Vec<f64>)>,
}

impl Adam {
    pub fn new(lr: f64, weight_decay: f64, betas: (f64, f64)) -> Self {
        Self::with_groups(vec![ParamGroup::new(lr, weight_decay)], betas)
    }

    pub fn with_groups(groups: Vec<ParamGroup>, betas: (f64, f64)) -> Self {
        Self {
            groups,
            beta1: betas.0,
            beta2: betas.1,
            eps: 1e-8,
            t: 0,
            moments: HashMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<(), HarnessError> {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

        for p in params.iter_mut() {
            let Some(group) = group_for(&self.groups, &p.name) else {
                continue;
            };
            let (lr, wd) = (group.lr, group.weight_decay);
            let len = p.value.len();
            let (m, v) = self
                .moments
                .entry(p.name.clone())
                .or_insert_with(|| (vec![0.0; len], vec![0.0; len]));
            if m.len() != len {
                return Err(HarnessError::shape(
                    format!("{} optimizer moments", m.len()),
                    format!("parameter '{}' with {len} elements", p.name),
                ));
            }

            let grads = p.grad.data().to_vec();
            for (i, (w, g)) in p.value.data_mut().iter_mut().zip(grads).enumerate() {
                let g = g as f64 + wd * *w as f64;
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bias1;
                let v_hat = v[i] / bias2;
                *w -= (lr * m_hat / (v_hat.sqrt() + self.eps)) as f32;
            }
        }
        Ok(())
    }

    fn param_groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    fn param_groups_mut(&mut self) -> &mut [ParamGroup] {
        &mut self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn param(values: Vec<f32>, grads: Vec<f32>) -> Parameter {
        let mut p = Parameter::new("w", Tensor::from_vec(values));
        p.grad = Tensor::from_vec(grads);
        p
    }

    #[test]
    fn test_sgd_step() {
        let mut p = param(vec![1.0, 2.0], vec![0.5, -0.5]);
        let mut opt = Sgd::new(0.1, 0.0);
        opt.step(&mut [&mut p]).unwrap();
        assert!((p.value.data()[0] - 0.95).abs() < 1e-6);
        assert!((p.value.data()[1] - 2.05).abs() < 1e-6);
    }

    #[test]
    fn test_zero_grad() {
        let mut p = param(vec![1.0], vec![3.0]);
        let mut opt = Sgd::new(0.1, 0.0);
        opt.zero_grad(&mut [&mut p]);
        assert_eq!(p.grad.data(), &[0.0]);
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        let mut p = param(vec![1.0], vec![2.0]);
        let mut opt = Adam::new(0.01, 0.0, (0.9, 0.999));
        opt.step(&mut [&mut p]).unwrap();
        // the first bias-corrected update has magnitude ~lr
        assert!((p.value.data()[0] - 0.99).abs() < 1e-5);
    }

    #[test]
    fn test_param_groups_by_prefix() {
        let mut enc = Parameter::new("encoder.w", Tensor::from_vec(vec![1.0]));
        enc.grad = Tensor::from_vec(vec![1.0]);
        let mut head = Parameter::new("head.w", Tensor::from_vec(vec![1.0]));
        head.grad = Tensor::from_vec(vec![1.0]);

        let mut opt = Sgd::with_groups(vec![
            ParamGroup::new(0.0, 0.0).with_prefix("encoder."),
            ParamGroup::new(0.5, 0.0),
        ]);
        opt.step(&mut [&mut enc, &mut head]).unwrap();
        assert_eq!(enc.value.data(), &[1.0]);
        assert_eq!(head.value.data(), &[0.5]);
        assert_eq!(opt.learning_rate(), 0.0);
    }
}
