use lantern_tensor::{atc_cuda_device_count, atc_cuda_is_available, atc_cudnn_is_available};

pub use lantern_tensor::Device;

use crate::error::{call, Result};

/// CUDA availability queries.
pub struct Cuda;

impl Cuda {
    pub fn device_count() -> Result<usize> {
        Ok(call(|| atc_cuda_device_count())?.max(0) as usize)
    }

    pub fn is_available() -> Result<bool> {
        Ok(call(|| atc_cuda_is_available())? != 0)
    }

    pub fn cudnn_is_available() -> Result<bool> {
        Ok(call(|| atc_cudnn_is_available())? != 0)
    }
}

/// The first CUDA device when one is present, the CPU otherwise.
pub fn cuda_if_available() -> Result<Device> {
    Ok(if Cuda::is_available()? {
        Device::Cuda(0)
    } else {
        Device::Cpu
    })
}
