//! libtorch runtime via `tch`.

use std::path::Path;
use std::sync::Mutex;

use tch::{CModule, COptimizer, Cuda, IValue, Tensor};

use super::{OptimizerConfig, Runtime};
use crate::error::{BridgeError, Result};
use crate::kind::{Device, Kind};
use crate::scalar::Scalar;
use crate::value::CallValue;

const ADAM_EPS: f64 = 1e-8;

pub struct TorchRuntime;

/// `CModule` is not `Sync`; calls are serialized per module.
pub struct TorchModule(Mutex<CModule>);

fn to_tch(kind: Kind) -> tch::Kind {
    match kind {
        Kind::Uint8 => tch::Kind::Uint8,
        Kind::Int8 => tch::Kind::Int8,
        Kind::Int16 => tch::Kind::Int16,
        Kind::Int => tch::Kind::Int,
        Kind::Int64 => tch::Kind::Int64,
        Kind::Half => tch::Kind::Half,
        Kind::Float => tch::Kind::Float,
        Kind::Double => tch::Kind::Double,
        Kind::ComplexHalf => tch::Kind::ComplexHalf,
        Kind::ComplexFloat => tch::Kind::ComplexFloat,
        Kind::ComplexDouble => tch::Kind::ComplexDouble,
        Kind::Bool => tch::Kind::Bool,
    }
}

fn of_tch(kind: tch::Kind) -> Result<Kind> {
    Ok(match kind {
        tch::Kind::Uint8 => Kind::Uint8,
        tch::Kind::Int8 => Kind::Int8,
        tch::Kind::Int16 => Kind::Int16,
        tch::Kind::Int => Kind::Int,
        tch::Kind::Int64 => Kind::Int64,
        tch::Kind::Half => Kind::Half,
        tch::Kind::Float => Kind::Float,
        tch::Kind::Double => Kind::Double,
        tch::Kind::ComplexHalf => Kind::ComplexHalf,
        tch::Kind::ComplexFloat => Kind::ComplexFloat,
        tch::Kind::ComplexDouble => Kind::ComplexDouble,
        tch::Kind::Bool => Kind::Bool,
        other => {
            return Err(BridgeError::runtime(format!(
                "unsupported scalar type {:?}",
                other
            )))
        }
    })
}

fn to_tch_ivalue(value: &CallValue<Tensor>) -> IValue {
    match value {
        CallValue::Tensor(t) => IValue::Tensor(t.shallow_clone()),
        CallValue::Int(v) => IValue::Int(*v),
        CallValue::Double(v) => IValue::Double(*v),
        CallValue::Tuple(items) => IValue::Tuple(items.iter().map(to_tch_ivalue).collect()),
    }
}

fn of_tch_ivalue(value: IValue) -> Result<CallValue<Tensor>> {
    Ok(match value {
        IValue::Tensor(t) => CallValue::Tensor(t),
        IValue::Int(v) => CallValue::Int(v),
        IValue::Double(v) => CallValue::Double(v),
        IValue::Tuple(items) => CallValue::Tuple(
            items
                .into_iter()
                .map(of_tch_ivalue)
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            return Err(BridgeError::runtime(format!(
                "unsupported module output {:?}",
                other
            )))
        }
    })
}

fn lock_module(module: &TorchModule) -> std::sync::MutexGuard<'_, CModule> {
    module.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn element(t: &Tensor, indexes: &[i64]) -> Result<Tensor> {
    let mut view = t.shallow_clone();
    for index in indexes {
        view = view.f_get(*index)?;
    }
    Ok(view)
}

impl Runtime for TorchRuntime {
    type Tensor = Tensor;
    type Optimizer = COptimizer;
    type Module = TorchModule;

    const NAME: &'static str = "torch";

    fn manual_seed(seed: i64) {
        tch::manual_seed(seed);
    }

    fn new_tensor() -> Tensor {
        Tensor::new()
    }

    fn tensor_of_data(data: &[u8], dims: &[i64], elt_size: usize, kind: Kind) -> Result<Tensor> {
        if elt_size != kind.elt_size_in_bytes() {
            return Err(BridgeError::runtime(format!(
                "incoherent element sizes in bytes {} and {:?}",
                elt_size, kind
            )));
        }
        Ok(Tensor::f_from_data_size(data, dims, to_tch(kind))?)
    }

    fn copy_data(t: &Tensor, dst: &mut [u8], numel: usize, elt_size: usize) -> Result<()> {
        let kind = of_tch(t.kind())?;
        if elt_size != kind.elt_size_in_bytes() {
            return Err(BridgeError::runtime(format!(
                "incoherent element sizes in bytes {} and {:?}",
                elt_size, kind
            )));
        }
        Ok(t.f_copy_data_u8(dst, numel)?)
    }

    fn shallow_clone(t: &Tensor) -> Tensor {
        t.shallow_clone()
    }

    fn defined(t: &Tensor) -> bool {
        t.defined()
    }

    fn device(t: &Tensor) -> Result<Device> {
        match t.device() {
            tch::Device::Cpu => Ok(Device::Cpu),
            tch::Device::Cuda(i) => Ok(Device::Cuda(i)),
            other => Err(BridgeError::runtime(format!("unsupported device {:?}", other))),
        }
    }

    fn shape(t: &Tensor) -> Result<Vec<i64>> {
        Ok(t.size())
    }

    fn kind(t: &Tensor) -> Result<Kind> {
        of_tch(t.kind())
    }

    fn requires_grad(t: &Tensor) -> Result<bool> {
        Ok(t.requires_grad())
    }

    fn set_requires_grad(t: &Tensor, requires_grad: bool) -> Result<()> {
        t.f_set_requires_grad(requires_grad)?;
        Ok(())
    }

    fn grad(t: &Tensor) -> Result<Tensor> {
        Ok(t.grad())
    }

    fn get(t: &Tensor, index: i64) -> Result<Tensor> {
        Ok(t.f_get(index)?)
    }

    fn double_value_at(t: &Tensor, indexes: &[i64]) -> Result<f64> {
        Ok(t.f_double_value(indexes)?)
    }

    fn int64_value_at(t: &Tensor, indexes: &[i64]) -> Result<i64> {
        Ok(t.f_int64_value(indexes)?)
    }

    fn set_double_value_at(t: &mut Tensor, indexes: &[i64], value: f64) -> Result<()> {
        let mut view = element(t, indexes)?;
        view.f_fill_(value)?;
        Ok(())
    }

    fn set_int64_value_at(t: &mut Tensor, indexes: &[i64], value: i64) -> Result<()> {
        let mut view = element(t, indexes)?;
        view.f_fill_(value)?;
        Ok(())
    }

    fn fill_double(t: &mut Tensor, value: f64) -> Result<()> {
        t.f_fill_(value)?;
        Ok(())
    }

    fn fill_int64(t: &mut Tensor, value: i64) -> Result<()> {
        t.f_fill_(value)?;
        Ok(())
    }

    fn copy_(dst: &mut Tensor, src: &Tensor) -> Result<()> {
        Ok(dst.f_copy_(src)?)
    }

    fn to_string(t: &Tensor, line_size: i64) -> Result<String> {
        Ok(t.to_string(line_size)?)
    }

    fn save(t: &Tensor, path: &Path) -> Result<()> {
        Ok(t.f_save(path)?)
    }

    fn load(path: &Path) -> Result<Tensor> {
        Ok(Tensor::load(path)?)
    }

    fn save_multi(named: &[(&str, &Tensor)], path: &Path) -> Result<()> {
        Ok(Tensor::save_multi(named, path)?)
    }

    fn load_multi(path: &Path) -> Result<Vec<(String, Tensor)>> {
        Ok(Tensor::load_multi(path)?)
    }

    fn load_image(path: &Path) -> Result<Tensor> {
        Ok(tch::vision::image::load(path)?.f_permute([1, 2, 0])?)
    }

    fn save_image(t: &Tensor, path: &Path) -> Result<()> {
        Ok(tch::vision::image::save(&t.f_permute([2, 0, 1])?, path)?)
    }

    fn resize_image(t: &Tensor, width: i64, height: i64) -> Result<Tensor> {
        let chw = t.f_permute([2, 0, 1])?;
        Ok(tch::vision::image::resize(&chw, width, height)?.f_permute([1, 2, 0])?)
    }

    fn run_backward(
        roots: &[&Tensor],
        inputs: &[&Tensor],
        keep_graph: bool,
        create_graph: bool,
    ) -> Result<Vec<Tensor>> {
        Ok(Tensor::f_run_backward(roots, inputs, keep_graph, create_graph)?)
    }

    fn grad_set_enabled(enabled: bool) -> Result<bool> {
        let previous = unsafe { torch_sys::at_grad_set_enabled(enabled as libc::c_int) };
        Ok(previous != 0)
    }

    fn no_grad<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
        tch::no_grad(f)
    }

    fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
        Ok(a.f_add(b)?)
    }

    fn sub(a: &Tensor, b: &Tensor) -> Result<Tensor> {
        Ok(a.f_sub(b)?)
    }

    fn mul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
        Ok(a.f_mul(b)?)
    }

    fn mul_scalar(t: &Tensor, s: Scalar) -> Result<Tensor> {
        let s = match s {
            Scalar::Int(v) => tch::Scalar::int(v),
            Scalar::Float(v) => tch::Scalar::float(v),
        };
        Ok(t.f_mul_scalar(s)?)
    }

    fn neg(t: &Tensor) -> Result<Tensor> {
        Ok(t.f_neg()?)
    }

    fn sum(t: &Tensor) -> Result<Tensor> {
        Ok(t.f_sum(None::<tch::Kind>)?)
    }

    fn mean(t: &Tensor) -> Result<Tensor> {
        Ok(t.f_mean(None::<tch::Kind>)?)
    }

    fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
        Ok(a.f_matmul(b)?)
    }

    fn zeros(dims: &[i64], kind: Kind) -> Result<Tensor> {
        Ok(Tensor::f_zeros(dims, (to_tch(kind), tch::Device::Cpu))?)
    }

    fn ones_like(t: &Tensor) -> Result<Tensor> {
        Ok(t.f_ones_like()?)
    }

    fn rand(dims: &[i64], kind: Kind) -> Result<Tensor> {
        Ok(Tensor::f_rand(dims, (to_tch(kind), tch::Device::Cpu))?)
    }

    fn optimizer(config: OptimizerConfig) -> Result<COptimizer> {
        let opt = match config {
            OptimizerConfig::Sgd {
                lr,
                momentum,
                dampening,
                weight_decay,
                nesterov,
            } => COptimizer::sgd(lr, momentum, dampening, weight_decay, nesterov)?,
            OptimizerConfig::Adam {
                lr,
                beta1,
                beta2,
                weight_decay,
            } => COptimizer::adam(lr, beta1, beta2, weight_decay, ADAM_EPS, false)?,
            OptimizerConfig::RmsProp {
                lr,
                alpha,
                eps,
                weight_decay,
                momentum,
                centered,
            } => COptimizer::rms_prop(lr, alpha, eps, weight_decay, momentum, centered)?,
        };
        Ok(opt)
    }

    fn add_parameters(opt: &mut COptimizer, params: &[&Tensor]) -> Result<()> {
        for p in params {
            opt.add_parameters(p, 0)?;
        }
        Ok(())
    }

    fn set_learning_rate(opt: &mut COptimizer, lr: f64) -> Result<()> {
        Ok(opt.set_learning_rate(lr)?)
    }

    fn set_momentum(opt: &mut COptimizer, momentum: f64) -> Result<()> {
        Ok(opt.set_momentum(momentum)?)
    }

    fn zero_grad(opt: &mut COptimizer) -> Result<()> {
        Ok(opt.zero_grad()?)
    }

    fn step(opt: &mut COptimizer) -> Result<()> {
        Ok(opt.step()?)
    }

    fn cuda_device_count() -> i32 {
        Cuda::device_count() as i32
    }

    fn cuda_is_available() -> bool {
        Cuda::is_available()
    }

    fn cudnn_is_available() -> bool {
        Cuda::cudnn_is_available()
    }

    fn set_benchmark_cudnn(enabled: bool) {
        Cuda::cudnn_set_benchmark(enabled);
    }

    fn load_module(path: &Path) -> Result<TorchModule> {
        let module = CModule::load(path)?;
        tracing::info!(path = %path.display(), "loaded torchscript module");
        Ok(TorchModule(Mutex::new(module)))
    }

    fn forward(module: &TorchModule, inputs: &[&Tensor]) -> Result<Tensor> {
        Ok(lock_module(module).forward_ts(inputs)?)
    }

    fn forward_values(module: &TorchModule, inputs: &[CallValue<Tensor>]) -> Result<CallValue<Tensor>> {
        let args: Vec<IValue> = inputs.iter().map(to_tch_ivalue).collect();
        let out = lock_module(module).forward_is(&args)?;
        of_tch_ivalue(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_grad_on_integers_is_an_error() {
        let ints = Tensor::from_slice(&[1i64, 2]);
        assert!(TorchRuntime::set_requires_grad(&ints, true).is_err());
        let floats = Tensor::from_slice(&[1.0f64, 2.0]);
        TorchRuntime::set_requires_grad(&floats, true).unwrap();
        assert!(floats.requires_grad());
        assert_eq!(TorchRuntime::NAME, "torch");
    }
}
