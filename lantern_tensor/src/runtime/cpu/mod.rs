//! Pure-Rust reference runtime.

mod archive;
mod autograd;
mod imaging;
mod module;
mod ops;
mod optim;
mod tensor;

use std::path::Path;

pub use module::CpuModule;
pub use optim::CpuOptimizer;
pub use tensor::CpuTensor;

use super::{OptimizerConfig, Runtime};
use crate::error::{BridgeError, Result};
use crate::kind::{Device, Kind};
use crate::scalar::Scalar;
use crate::value::CallValue;
use optim::Algorithm;

const SINGLE_TENSOR_NAME: &str = "tensor";

pub struct CpuRuntime;

fn dims_to_shape(dims: &[i64]) -> Result<Vec<usize>> {
    let shape = dims
        .iter()
        .map(|d| {
            usize::try_from(*d).map_err(|_| {
                BridgeError::runtime(format!("Trying to create tensor with negative dimension {}", d))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    tensor::checked_numel(&shape)?;
    Ok(shape)
}

/// Walks `indexes` through successive first-dimension views.
fn element_view(t: &CpuTensor, indexes: &[i64]) -> Result<CpuTensor> {
    if indexes.len() > t.shape()?.len() {
        return Err(BridgeError::runtime(format!(
            "too many indices for tensor of dimension {}",
            t.shape()?.len()
        )));
    }
    let mut view = t.clone();
    for index in indexes {
        view = view.select_view(*index)?;
    }
    Ok(view)
}

fn single_element(view: &CpuTensor) -> Result<()> {
    let numel = view.numel()?;
    if numel != 1 {
        return Err(BridgeError::runtime(format!(
            "a Tensor with {} elements cannot be converted to Scalar",
            numel
        )));
    }
    Ok(())
}

impl Runtime for CpuRuntime {
    type Tensor = CpuTensor;
    type Optimizer = CpuOptimizer;
    type Module = CpuModule;

    const NAME: &'static str = "cpu";

    fn manual_seed(seed: i64) {
        ops::manual_seed(seed);
    }

    fn new_tensor() -> CpuTensor {
        CpuTensor::undefined()
    }

    fn tensor_of_data(data: &[u8], dims: &[i64], elt_size: usize, kind: Kind) -> Result<CpuTensor> {
        CpuTensor::from_bytes(data, &dims_to_shape(dims)?, elt_size, kind)
    }

    fn copy_data(t: &CpuTensor, dst: &mut [u8], numel: usize, elt_size: usize) -> Result<()> {
        t.copy_to_bytes(dst, numel, elt_size)
    }

    fn shallow_clone(t: &CpuTensor) -> CpuTensor {
        t.clone()
    }

    fn defined(t: &CpuTensor) -> bool {
        t.defined()
    }

    fn device(t: &CpuTensor) -> Result<Device> {
        t.imp()?;
        Ok(Device::Cpu)
    }

    fn shape(t: &CpuTensor) -> Result<Vec<i64>> {
        Ok(t.shape()?.iter().map(|d| *d as i64).collect())
    }

    fn kind(t: &CpuTensor) -> Result<Kind> {
        t.kind()
    }

    fn requires_grad(t: &CpuTensor) -> Result<bool> {
        t.imp()?;
        Ok(t.requires_grad())
    }

    fn set_requires_grad(t: &CpuTensor, requires_grad: bool) -> Result<()> {
        if requires_grad && !t.kind()?.is_floating_point() {
            return Err(BridgeError::runtime(
                "only Tensors of floating point dtype can require gradients",
            ));
        }
        if !t.is_leaf() {
            return Err(BridgeError::runtime(
                "you can only change requires_grad flags of leaf variables.",
            ));
        }
        t.meta()?.requires_grad = requires_grad;
        Ok(())
    }

    fn grad(t: &CpuTensor) -> Result<CpuTensor> {
        Ok(t.meta()?.grad.clone().unwrap_or_default())
    }

    fn get(t: &CpuTensor, index: i64) -> Result<CpuTensor> {
        ops::select(t, index)
    }

    fn double_value_at(t: &CpuTensor, indexes: &[i64]) -> Result<f64> {
        let view = element_view(t, indexes)?;
        single_element(&view)?;
        Ok(view.values_f64()?[0])
    }

    fn int64_value_at(t: &CpuTensor, indexes: &[i64]) -> Result<i64> {
        let view = element_view(t, indexes)?;
        single_element(&view)?;
        Ok(view.values_i64()?[0])
    }

    fn set_double_value_at(t: &mut CpuTensor, indexes: &[i64], value: f64) -> Result<()> {
        t.check_inplace()?;
        let view = element_view(t, indexes)?;
        view.write_f64(&vec![value; view.numel()?])
    }

    fn set_int64_value_at(t: &mut CpuTensor, indexes: &[i64], value: i64) -> Result<()> {
        t.check_inplace()?;
        let view = element_view(t, indexes)?;
        view.write_i64(&vec![value; view.numel()?])
    }

    fn fill_double(t: &mut CpuTensor, value: f64) -> Result<()> {
        t.check_inplace()?;
        t.write_f64(&vec![value; t.numel()?])
    }

    fn fill_int64(t: &mut CpuTensor, value: i64) -> Result<()> {
        t.check_inplace()?;
        t.write_i64(&vec![value; t.numel()?])
    }

    fn copy_(dst: &mut CpuTensor, src: &CpuTensor) -> Result<()> {
        dst.check_inplace()?;
        let shape = dst.shape()?.to_vec();
        let expanded = autograd::without_recording(|| ops::expand(src, &shape))?;
        if src.kind()?.is_floating_point() {
            dst.write_f64(&expanded.values_f64()?)
        } else {
            dst.write_i64(&expanded.values_i64()?)
        }
    }

    fn to_string(t: &CpuTensor, line_size: i64) -> Result<String> {
        t.render(line_size)
    }

    fn save(t: &CpuTensor, path: &Path) -> Result<()> {
        archive::save(&[(SINGLE_TENSOR_NAME, t)], path)
    }

    fn load(path: &Path) -> Result<CpuTensor> {
        archive::load(path)?
            .into_iter()
            .next()
            .map(|(_, t)| t)
            .ok_or_else(|| BridgeError::runtime(format!("{} holds no tensor", path.display())))
    }

    fn save_multi(named: &[(&str, &CpuTensor)], path: &Path) -> Result<()> {
        archive::save(named, path)
    }

    fn load_multi(path: &Path) -> Result<Vec<(String, CpuTensor)>> {
        archive::load(path)
    }

    fn load_image(path: &Path) -> Result<CpuTensor> {
        imaging::load(path)
    }

    fn save_image(t: &CpuTensor, path: &Path) -> Result<()> {
        imaging::save(t, path)
    }

    fn resize_image(t: &CpuTensor, width: i64, height: i64) -> Result<CpuTensor> {
        imaging::resize(t, width, height)
    }

    fn run_backward(
        roots: &[&CpuTensor],
        inputs: &[&CpuTensor],
        keep_graph: bool,
        create_graph: bool,
    ) -> Result<Vec<CpuTensor>> {
        let roots: Vec<CpuTensor> = roots.iter().map(|t| (*t).clone()).collect();
        let inputs: Vec<CpuTensor> = inputs.iter().map(|t| (*t).clone()).collect();
        autograd::run_backward(&roots, &inputs, keep_graph, create_graph)
    }

    fn grad_set_enabled(enabled: bool) -> Result<bool> {
        Ok(autograd::set_grad_enabled(enabled))
    }

    fn no_grad<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
        autograd::without_recording(f)
    }

    fn add(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        ops::add(a, b)
    }

    fn sub(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        ops::sub(a, b)
    }

    fn mul(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        ops::mul(a, b)
    }

    fn mul_scalar(t: &CpuTensor, s: Scalar) -> Result<CpuTensor> {
        ops::mul_scalar(t, s.to_float())
    }

    fn neg(t: &CpuTensor) -> Result<CpuTensor> {
        ops::neg(t)
    }

    fn sum(t: &CpuTensor) -> Result<CpuTensor> {
        ops::sum(t)
    }

    fn mean(t: &CpuTensor) -> Result<CpuTensor> {
        ops::mean(t)
    }

    fn matmul(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
        ops::matmul(a, b)
    }

    fn zeros(dims: &[i64], kind: Kind) -> Result<CpuTensor> {
        ops::zeros(&dims_to_shape(dims)?, kind)
    }

    fn ones_like(t: &CpuTensor) -> Result<CpuTensor> {
        ops::ones_like(t)
    }

    fn rand(dims: &[i64], kind: Kind) -> Result<CpuTensor> {
        ops::rand(&dims_to_shape(dims)?, kind)
    }

    fn optimizer(config: OptimizerConfig) -> Result<CpuOptimizer> {
        match config {
            OptimizerConfig::Sgd {
                lr,
                momentum,
                dampening,
                weight_decay,
                nesterov,
            } => CpuOptimizer::new(
                lr,
                Algorithm::Sgd {
                    momentum,
                    dampening,
                    weight_decay,
                    nesterov,
                },
            ),
            OptimizerConfig::Adam {
                lr,
                beta1,
                beta2,
                weight_decay,
            } => CpuOptimizer::new(
                lr,
                Algorithm::Adam {
                    beta1,
                    beta2,
                    weight_decay,
                },
            ),
            OptimizerConfig::RmsProp {
                lr,
                alpha,
                eps,
                weight_decay,
                momentum,
                centered,
            } => CpuOptimizer::new(
                lr,
                Algorithm::RmsProp {
                    alpha,
                    eps,
                    weight_decay,
                    momentum,
                    centered,
                },
            ),
        }
    }

    fn add_parameters(opt: &mut CpuOptimizer, params: &[&CpuTensor]) -> Result<()> {
        let params: Vec<CpuTensor> = params.iter().map(|t| (*t).clone()).collect();
        opt.add_parameters(&params)
    }

    fn set_learning_rate(opt: &mut CpuOptimizer, lr: f64) -> Result<()> {
        opt.set_learning_rate(lr);
        Ok(())
    }

    fn set_momentum(opt: &mut CpuOptimizer, momentum: f64) -> Result<()> {
        opt.set_momentum(momentum);
        Ok(())
    }

    fn zero_grad(opt: &mut CpuOptimizer) -> Result<()> {
        opt.zero_grad()
    }

    fn step(opt: &mut CpuOptimizer) -> Result<()> {
        opt.step()
    }

    fn cuda_device_count() -> i32 {
        0
    }

    fn cuda_is_available() -> bool {
        false
    }

    fn cudnn_is_available() -> bool {
        false
    }

    fn set_benchmark_cudnn(_enabled: bool) {}

    fn load_module(path: &Path) -> Result<CpuModule> {
        CpuModule::load(path)
    }

    fn forward(module: &CpuModule, inputs: &[&CpuTensor]) -> Result<CpuTensor> {
        let args: Vec<CallValue<CpuTensor>> = inputs.iter().map(|t| CallValue::Tensor((*t).clone())).collect();
        let out = module.forward(&args)?;
        Ok(out.as_tensor()?.clone())
    }

    fn forward_values(module: &CpuModule, inputs: &[CallValue<CpuTensor>]) -> Result<CallValue<CpuTensor>> {
        module.forward(inputs)
    }
}
