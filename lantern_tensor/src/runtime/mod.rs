//! The runtime seam.
//!
//! The boundary layer only moves handles, marshals buffers and reports
//! failures. Everything numerical is delegated to a [`Runtime`]. The crate
//! ships a pure-Rust CPU engine and, behind the `torch` feature, libtorch.

use std::path::Path;

use crate::error::Result;
use crate::kind::{Device, Kind};
use crate::scalar::Scalar;
use crate::value::CallValue;

pub mod cpu;
#[cfg(feature = "torch")]
pub mod torch;

#[cfg(not(feature = "torch"))]
pub type Active = cpu::CpuRuntime;
#[cfg(feature = "torch")]
pub type Active = torch::TorchRuntime;

/// Hyperparameters of the three optimizer families.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptimizerConfig {
    Sgd {
        lr: f64,
        momentum: f64,
        dampening: f64,
        weight_decay: f64,
        nesterov: bool,
    },
    Adam {
        lr: f64,
        beta1: f64,
        beta2: f64,
        weight_decay: f64,
    },
    RmsProp {
        lr: f64,
        alpha: f64,
        eps: f64,
        weight_decay: f64,
        momentum: f64,
        centered: bool,
    },
}

pub trait Runtime {
    type Tensor: Send + 'static;
    type Optimizer: Send + 'static;
    type Module: Send + Sync + 'static;

    /// Reported by `at_runtime_name`.
    const NAME: &'static str;

    fn manual_seed(seed: i64);

    fn new_tensor() -> Self::Tensor;
    fn tensor_of_data(data: &[u8], dims: &[i64], elt_size: usize, kind: Kind) -> Result<Self::Tensor>;
    fn copy_data(t: &Self::Tensor, dst: &mut [u8], numel: usize, elt_size: usize) -> Result<()>;
    fn shallow_clone(t: &Self::Tensor) -> Self::Tensor;

    fn defined(t: &Self::Tensor) -> bool;
    fn device(t: &Self::Tensor) -> Result<Device>;
    fn shape(t: &Self::Tensor) -> Result<Vec<i64>>;
    fn kind(t: &Self::Tensor) -> Result<Kind>;
    fn requires_grad(t: &Self::Tensor) -> Result<bool>;
    fn set_requires_grad(t: &Self::Tensor, requires_grad: bool) -> Result<()>;
    /// The accumulated gradient, or an undefined tensor.
    fn grad(t: &Self::Tensor) -> Result<Self::Tensor>;
    /// View of the `index`-th slice along the first dimension.
    fn get(t: &Self::Tensor, index: i64) -> Result<Self::Tensor>;

    fn double_value_at(t: &Self::Tensor, indexes: &[i64]) -> Result<f64>;
    fn int64_value_at(t: &Self::Tensor, indexes: &[i64]) -> Result<i64>;
    fn set_double_value_at(t: &mut Self::Tensor, indexes: &[i64], value: f64) -> Result<()>;
    fn set_int64_value_at(t: &mut Self::Tensor, indexes: &[i64], value: i64) -> Result<()>;
    fn fill_double(t: &mut Self::Tensor, value: f64) -> Result<()>;
    fn fill_int64(t: &mut Self::Tensor, value: i64) -> Result<()>;
    /// Copies `src` into `dst`, broadcasting `src` to the shape of `dst`.
    fn copy_(dst: &mut Self::Tensor, src: &Self::Tensor) -> Result<()>;
    fn to_string(t: &Self::Tensor, line_size: i64) -> Result<String>;

    fn save(t: &Self::Tensor, path: &Path) -> Result<()>;
    fn load(path: &Path) -> Result<Self::Tensor>;
    fn save_multi(named: &[(&str, &Self::Tensor)], path: &Path) -> Result<()>;
    /// Every named tensor of an archive, in file order.
    fn load_multi(path: &Path) -> Result<Vec<(String, Self::Tensor)>>;

    fn load_image(path: &Path) -> Result<Self::Tensor>;
    fn save_image(t: &Self::Tensor, path: &Path) -> Result<()>;
    fn resize_image(t: &Self::Tensor, width: i64, height: i64) -> Result<Self::Tensor>;

    fn run_backward(
        roots: &[&Self::Tensor],
        inputs: &[&Self::Tensor],
        keep_graph: bool,
        create_graph: bool,
    ) -> Result<Vec<Self::Tensor>>;
    /// Sets the process-wide recording flag, returning the previous value.
    fn grad_set_enabled(enabled: bool) -> Result<bool>;
    /// Runs `f` with recording disabled on the calling thread only.
    fn no_grad<T>(f: impl FnOnce() -> Result<T>) -> Result<T>;

    fn add(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn sub(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn mul(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn mul_scalar(t: &Self::Tensor, s: Scalar) -> Result<Self::Tensor>;
    fn neg(t: &Self::Tensor) -> Result<Self::Tensor>;
    fn sum(t: &Self::Tensor) -> Result<Self::Tensor>;
    fn mean(t: &Self::Tensor) -> Result<Self::Tensor>;
    fn matmul(a: &Self::Tensor, b: &Self::Tensor) -> Result<Self::Tensor>;
    fn zeros(dims: &[i64], kind: Kind) -> Result<Self::Tensor>;
    fn ones_like(t: &Self::Tensor) -> Result<Self::Tensor>;
    fn rand(dims: &[i64], kind: Kind) -> Result<Self::Tensor>;

    fn optimizer(config: OptimizerConfig) -> Result<Self::Optimizer>;
    fn add_parameters(opt: &mut Self::Optimizer, params: &[&Self::Tensor]) -> Result<()>;
    fn set_learning_rate(opt: &mut Self::Optimizer, lr: f64) -> Result<()>;
    fn set_momentum(opt: &mut Self::Optimizer, momentum: f64) -> Result<()>;
    fn zero_grad(opt: &mut Self::Optimizer) -> Result<()>;
    fn step(opt: &mut Self::Optimizer) -> Result<()>;

    fn cuda_device_count() -> i32;
    fn cuda_is_available() -> bool;
    fn cudnn_is_available() -> bool;
    fn set_benchmark_cudnn(enabled: bool);

    fn load_module(path: &Path) -> Result<Self::Module>;
    fn forward(module: &Self::Module, inputs: &[&Self::Tensor]) -> Result<Self::Tensor>;
    fn forward_values(
        module: &Self::Module,
        inputs: &[CallValue<Self::Tensor>],
    ) -> Result<CallValue<Self::Tensor>>;
}
