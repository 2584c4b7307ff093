//! Safe, ownership-typed access to the lantern runtime.
//!
//! Every handle is owned by exactly one Rust value and released on drop.
//! Each call drains the boundary's error slot, so failures arrive as
//! `Err` from the call that caused them.

pub mod device;
pub mod error;
pub mod guards;
pub mod ivalue;
pub mod module;
pub mod optim;
pub mod scalar;
pub mod tensor;
mod util;
pub mod vision;

use std::ffi::CStr;

pub use device::{cuda_if_available, Cuda, Device};
pub use error::{Error, Result};
pub use guards::{no_grad, CudnnBenchmark, GradGuard};
pub use ivalue::IValue;
pub use lantern_tensor::{Kind, Tag};
pub use module::CModule;
pub use optim::{Optimizer, OptimizerConfig};
pub use scalar::Scalar;
pub use tensor::{Element, Tensor};

/// Seeds the generator behind `Tensor::rand`.
pub fn manual_seed(seed: i64) -> Result<()> {
    error::call(|| lantern_tensor::at_manual_seed(seed))
}

/// Name of the runtime compiled in: `"cpu"` or `"torch"`.
pub fn runtime_name() -> &'static str {
    let ptr = lantern_tensor::at_runtime_name();
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("unknown")
}
