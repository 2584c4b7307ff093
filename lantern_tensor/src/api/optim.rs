use std::sync::{Arc, Mutex, MutexGuard};

use libc::c_int;

use super::util::slice_arg;
use super::{flag, tensors, RtOptimizer, OPTIMIZERS};
use crate::channel::ffi_guard;
use crate::error::Result;
use crate::registry::{Handle, NULL_HANDLE};
use crate::runtime::{Active, OptimizerConfig, Runtime};

fn register(config: OptimizerConfig) -> Result<Handle> {
    let opt = Active::optimizer(config)?;
    let handle = OPTIMIZERS.insert(Arc::new(Mutex::new(opt)));
    tracing::debug!(handle, ?config, "optimizer created");
    Ok(handle)
}

/// Runs `f` on the optimizer after the registry lock has been released.
fn with_optimizer<T>(handle: Handle, f: impl FnOnce(&mut RtOptimizer) -> Result<T>) -> Result<T> {
    let opt = OPTIMIZERS.get(handle)?;
    let mut guard: MutexGuard<'_, RtOptimizer> = opt.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

#[no_mangle]
pub extern "C" fn ato_sgd(lr: f64, momentum: f64, dampening: f64, weight_decay: f64, nesterov: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        register(OptimizerConfig::Sgd {
            lr,
            momentum,
            dampening,
            weight_decay,
            nesterov: flag(nesterov),
        })
    })
}

#[no_mangle]
pub extern "C" fn ato_adam(lr: f64, beta1: f64, beta2: f64, weight_decay: f64) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        register(OptimizerConfig::Adam {
            lr,
            beta1,
            beta2,
            weight_decay,
        })
    })
}

#[no_mangle]
pub extern "C" fn ato_rms_prop(
    lr: f64,
    alpha: f64,
    eps: f64,
    weight_decay: f64,
    momentum: f64,
    centered: c_int,
) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        register(OptimizerConfig::RmsProp {
            lr,
            alpha,
            eps,
            weight_decay,
            momentum,
            centered: flag(centered),
        })
    })
}

/// Appends parameters in order. The optimizer references them; it never
/// owns or frees them.
#[no_mangle]
pub extern "C" fn ato_add_parameters(opt: Handle, tensor_handles: *const Handle, ntensors: c_int) {
    ffi_guard((), || {
        let params = tensors(slice_arg(tensor_handles, ntensors as i64, "tensors")?)?;
        let refs: Vec<_> = params.iter().collect();
        with_optimizer(opt, |o| Active::add_parameters(o, &refs))
    })
}

#[no_mangle]
pub extern "C" fn ato_set_learning_rate(opt: Handle, lr: f64) {
    ffi_guard((), || with_optimizer(opt, |o| Active::set_learning_rate(o, lr)))
}

#[no_mangle]
pub extern "C" fn ato_set_momentum(opt: Handle, momentum: f64) {
    ffi_guard((), || with_optimizer(opt, |o| Active::set_momentum(o, momentum)))
}

#[no_mangle]
pub extern "C" fn ato_zero_grad(opt: Handle) {
    ffi_guard((), || with_optimizer(opt, Active::zero_grad))
}

#[no_mangle]
pub extern "C" fn ato_step(opt: Handle) {
    ffi_guard((), || with_optimizer(opt, Active::step))
}

#[no_mangle]
pub extern "C" fn ato_free(opt: Handle) {
    ffi_guard((), || {
        OPTIMIZERS.remove(opt)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn ato_live_optimizers() -> i64 {
    OPTIMIZERS.len() as i64
}
