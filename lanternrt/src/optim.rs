//! Optimizers over borrowed parameters.
//!
//! An `Optimizer<'p>` refers to its parameters without owning them; the
//! borrow keeps every parameter alive and unmodified by safe code for as
//! long as the optimizer exists.

use std::marker::PhantomData;

use lantern_tensor::{
    ato_adam, ato_add_parameters, ato_free, ato_rms_prop, ato_set_learning_rate, ato_set_momentum,
    ato_sgd, ato_step, ato_zero_grad, Handle,
};

use crate::error::{call, Result};
use crate::tensor::Tensor;
use crate::util::c_len;

/// Algorithm and hyperparameters, excluding the learning rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerConfig {
    Sgd {
        momentum: f64,
        dampening: f64,
        weight_decay: f64,
        nesterov: bool,
    },
    Adam {
        beta1: f64,
        beta2: f64,
        weight_decay: f64,
    },
    RmsProp {
        alpha: f64,
        eps: f64,
        weight_decay: f64,
        momentum: f64,
        centered: bool,
    },
}

impl OptimizerConfig {
    pub fn sgd(momentum: f64) -> Self {
        OptimizerConfig::Sgd {
            momentum,
            dampening: 0.0,
            weight_decay: 0.0,
            nesterov: false,
        }
    }

    pub fn adam() -> Self {
        OptimizerConfig::Adam {
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.0,
        }
    }

    pub fn rms_prop() -> Self {
        OptimizerConfig::RmsProp {
            alpha: 0.99,
            eps: 1e-8,
            weight_decay: 0.0,
            momentum: 0.0,
            centered: false,
        }
    }

    /// Creates an optimizer with no parameters yet.
    pub fn build<'p>(self, lr: f64) -> Result<Optimizer<'p>> {
        let handle = call(|| match self {
            OptimizerConfig::Sgd {
                momentum,
                dampening,
                weight_decay,
                nesterov,
            } => ato_sgd(lr, momentum, dampening, weight_decay, nesterov as i32),
            OptimizerConfig::Adam {
                beta1,
                beta2,
                weight_decay,
            } => ato_adam(lr, beta1, beta2, weight_decay),
            OptimizerConfig::RmsProp {
                alpha,
                eps,
                weight_decay,
                momentum,
                centered,
            } => ato_rms_prop(lr, alpha, eps, weight_decay, momentum, centered as i32),
        })?;
        tracing::debug!(?self, lr, "optimizer created");
        Ok(Optimizer {
            handle,
            params: PhantomData,
        })
    }
}

pub struct Optimizer<'p> {
    handle: Handle,
    params: PhantomData<&'p Tensor>,
}

impl<'p> Optimizer<'p> {
    /// Appends parameters; they must be floating point.
    pub fn add_parameters(&mut self, params: &[&'p Tensor]) -> Result<()> {
        let handles: Vec<Handle> = params.iter().map(|t| t.handle()).collect();
        let n = c_len("parameters", handles.len())?;
        call(|| ato_add_parameters(self.handle, handles.as_ptr(), n))
    }

    pub fn set_learning_rate(&mut self, lr: f64) -> Result<()> {
        call(|| ato_set_learning_rate(self.handle, lr))
    }

    pub fn set_momentum(&mut self, momentum: f64) -> Result<()> {
        call(|| ato_set_momentum(self.handle, momentum))
    }

    pub fn zero_grad(&mut self) -> Result<()> {
        call(|| ato_zero_grad(self.handle))
    }

    pub fn step(&mut self) -> Result<()> {
        call(|| ato_step(self.handle))
    }

    /// `zero_grad`, backward through `loss`, then `step`.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        self.zero_grad()?;
        loss.backward()?;
        self.step()
    }
}

impl Drop for Optimizer<'_> {
    fn drop(&mut self) {
        if let Err(err) = call(|| ato_free(self.handle)) {
            tracing::warn!(handle = self.handle, error = %err, "failed to release optimizer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_accumulates_across_steps() {
        let w = Tensor::of_slice(&[1.0f64]).unwrap();
        w.set_requires_grad(true).unwrap();
        let mut opt = OptimizerConfig::sgd(0.5).build(0.1).unwrap();
        opt.add_parameters(&[&w]).unwrap();
        for _ in 0..2 {
            let loss = w.sum().unwrap();
            opt.backward_step(&loss).unwrap();
        }
        // buf = 1, then 0.5 * 1 + 1 = 1.5; total movement 0.1 * 2.5.
        assert!((w.double_value(&[0]).unwrap() - 0.75).abs() < 1e-12);
    }
}
