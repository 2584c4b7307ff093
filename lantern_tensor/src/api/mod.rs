//! The `extern "C"` surface.
//!
//! Every entry point runs inside `ffi_guard`, resolves its handle arguments
//! to working copies, releases the registry lock, then calls the runtime.
//! Failures land in the calling thread's error channel and the entry point
//! returns its sentinel (`0`, `0.0`, null or nothing).

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::error::Result;
use crate::registry::{Handle, Registry};
use crate::runtime::{Active, Runtime};
use crate::scalar::Scalar;
use crate::value::CallValue;

pub mod autograd;
pub mod device;
pub mod ivalue;
pub mod module;
pub mod ops;
pub mod optim;
pub mod scalar;
pub mod tensor;
pub(crate) mod util;

pub(crate) type RtTensor = <Active as Runtime>::Tensor;
pub(crate) type RtOptimizer = <Active as Runtime>::Optimizer;
pub(crate) type RtModule = <Active as Runtime>::Module;

pub(crate) static TENSORS: Lazy<Registry<RtTensor>> = Lazy::new(|| Registry::new("tensor"));
pub(crate) static SCALARS: Lazy<Registry<Scalar>> = Lazy::new(|| Registry::new("scalar"));
pub(crate) static OPTIMIZERS: Lazy<Registry<Arc<Mutex<RtOptimizer>>>> =
    Lazy::new(|| Registry::new("optimizer"));
pub(crate) static MODULES: Lazy<Registry<Arc<RtModule>>> = Lazy::new(|| Registry::new("module"));
pub(crate) static VALUES: Lazy<Registry<CallValue<Handle>>> = Lazy::new(|| Registry::new("ivalue"));

/// A working copy of a registered tensor sharing its storage.
pub(crate) fn tensor(handle: Handle) -> Result<RtTensor> {
    TENSORS.with(handle, Active::shallow_clone)
}

pub(crate) fn tensors(handles: &[Handle]) -> Result<Vec<RtTensor>> {
    handles.iter().map(|h| tensor(*h)).collect()
}

pub(crate) fn register_tensor(t: RtTensor) -> Handle {
    TENSORS.insert(t)
}

pub(crate) fn flag(v: libc::c_int) -> bool {
    v != 0
}
