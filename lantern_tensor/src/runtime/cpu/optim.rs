//! First-order optimizers over parameter tensors.
//!
//! Updates follow the libtorch formulas and run with recording disabled,
//! writing parameter storage in place.

use super::autograd::without_recording;
use super::tensor::CpuTensor;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Algorithm {
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

const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Default)]
struct ParamState {
    step: u64,
    momentum_buffer: Option<Vec<f64>>,
    exp_avg: Vec<f64>,
    exp_avg_sq: Vec<f64>,
    square_avg: Vec<f64>,
    grad_avg: Vec<f64>,
}

#[derive(Debug)]
pub struct CpuOptimizer {
    lr: f64,
    algorithm: Algorithm,
    params: Vec<CpuTensor>,
    state: Vec<ParamState>,
}

impl CpuOptimizer {
    pub(crate) fn new(lr: f64, algorithm: Algorithm) -> Result<Self> {
        if lr < 0.0 {
            return Err(BridgeError::runtime(format!("Invalid learning rate: {}", lr)));
        }
        if let Algorithm::Sgd { momentum, dampening, nesterov: true, .. } = algorithm {
            if momentum <= 0.0 || dampening != 0.0 {
                return Err(BridgeError::runtime(
                    "Nesterov momentum requires a momentum and zero dampening",
                ));
            }
        }
        Ok(Self {
            lr,
            algorithm,
            params: Vec::new(),
            state: Vec::new(),
        })
    }

    pub(crate) fn add_parameters(&mut self, params: &[CpuTensor]) -> Result<()> {
        for p in params {
            if !p.kind()?.is_floating_point() {
                return Err(BridgeError::runtime(
                    "optimizers can only handle floating point parameters",
                ));
            }
            self.params.push(p.clone());
            self.state.push(ParamState::default());
        }
        Ok(())
    }

    pub(crate) fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    pub(crate) fn set_momentum(&mut self, value: f64) {
        match &mut self.algorithm {
            Algorithm::Sgd { momentum, .. } => *momentum = value,
            Algorithm::Adam { beta1, .. } => *beta1 = value,
            Algorithm::RmsProp { momentum, .. } => *momentum = value,
        }
    }

    pub(crate) fn zero_grad(&mut self) -> Result<()> {
        for p in &self.params {
            let grad = p.meta()?.grad.clone();
            if let Some(grad) = grad {
                grad.write_f64(&vec![0.0; grad.numel()?])?;
            }
        }
        Ok(())
    }

    pub(crate) fn step(&mut self) -> Result<()> {
        let lr = self.lr;
        let algorithm = self.algorithm;
        without_recording(|| {
            for (param, state) in self.params.iter().zip(self.state.iter_mut()) {
                let grad = match param.meta()?.grad.clone() {
                    Some(grad) => grad,
                    None => continue,
                };
                let mut values = param.values_f64()?;
                let mut g = grad.values_f64()?;
                if g.len() != values.len() {
                    return Err(BridgeError::runtime("gradient shape does not match its parameter"));
                }
                update(lr, algorithm, state, &mut values, &mut g);
                param.write_f64(&values)?;
            }
            Ok(())
        })
    }
}

fn update(lr: f64, algorithm: Algorithm, state: &mut ParamState, p: &mut [f64], g: &mut [f64]) {
    state.step += 1;
    match algorithm {
        Algorithm::Sgd {
            momentum,
            dampening,
            weight_decay,
            nesterov,
        } => {
            if weight_decay != 0.0 {
                for (gi, pi) in g.iter_mut().zip(p.iter()) {
                    *gi += weight_decay * pi;
                }
            }
            if momentum != 0.0 {
                let buf = match state.momentum_buffer.take() {
                    None => g.to_vec(),
                    Some(mut buf) => {
                        for (b, gi) in buf.iter_mut().zip(g.iter()) {
                            *b = momentum * *b + (1.0 - dampening) * gi;
                        }
                        buf
                    }
                };
                if nesterov {
                    for (gi, b) in g.iter_mut().zip(&buf) {
                        *gi += momentum * b;
                    }
                } else {
                    g.copy_from_slice(&buf);
                }
                state.momentum_buffer = Some(buf);
            }
            for (pi, gi) in p.iter_mut().zip(g.iter()) {
                *pi -= lr * gi;
            }
        }
        Algorithm::Adam {
            beta1,
            beta2,
            weight_decay,
        } => {
            if state.exp_avg.is_empty() {
                state.exp_avg = vec![0.0; p.len()];
                state.exp_avg_sq = vec![0.0; p.len()];
            }
            let t = state.step as i32;
            let bias1 = 1.0 - beta1.powi(t);
            let bias2 = 1.0 - beta2.powi(t);
            for i in 0..p.len() {
                let gi = g[i] + weight_decay * p[i];
                state.exp_avg[i] = beta1 * state.exp_avg[i] + (1.0 - beta1) * gi;
                state.exp_avg_sq[i] = beta2 * state.exp_avg_sq[i] + (1.0 - beta2) * gi * gi;
                let denom = (state.exp_avg_sq[i] / bias2).sqrt() + ADAM_EPS;
                p[i] -= lr * (state.exp_avg[i] / bias1) / denom;
            }
        }
        Algorithm::RmsProp {
            alpha,
            eps,
            weight_decay,
            momentum,
            centered,
        } => {
            if state.square_avg.is_empty() {
                state.square_avg = vec![0.0; p.len()];
                state.grad_avg = vec![0.0; p.len()];
            }
            let buf = state.momentum_buffer.get_or_insert_with(|| vec![0.0; p.len()]);
            for i in 0..p.len() {
                let gi = g[i] + weight_decay * p[i];
                state.square_avg[i] = alpha * state.square_avg[i] + (1.0 - alpha) * gi * gi;
                let avg = if centered {
                    state.grad_avg[i] = alpha * state.grad_avg[i] + (1.0 - alpha) * gi;
                    (state.square_avg[i] - state.grad_avg[i] * state.grad_avg[i]).sqrt() + eps
                } else {
                    state.square_avg[i].sqrt() + eps
                };
                if momentum > 0.0 {
                    buf[i] = momentum * buf[i] + gi / avg;
                    p[i] -= lr * buf[i];
                } else {
                    p[i] -= lr * gi / avg;
                }
            }
        }
    }
}
