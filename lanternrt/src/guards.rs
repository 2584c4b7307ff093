//! Scope guards for the process-wide toggles. Each guard restores the value
//! it found when dropped, including on early return.

use lantern_tensor::{at_grad_set_enabled, atc_benchmark_cudnn, atc_set_benchmark_cudnn};

use crate::error::{call, Result};

/// Sets gradient recording for the guard's lifetime.
#[derive(Debug)]
pub struct GradGuard {
    previous: bool,
}

impl GradGuard {
    pub fn new(enabled: bool) -> Result<GradGuard> {
        let previous = call(|| at_grad_set_enabled(enabled as i32))? != 0;
        Ok(GradGuard { previous })
    }
}

impl Drop for GradGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        if let Err(err) = call(|| at_grad_set_enabled(previous as i32)) {
            tracing::warn!(error = %err, "failed to restore grad mode");
        }
    }
}

/// Runs `f` with gradient recording off.
pub fn no_grad<T>(f: impl FnOnce() -> T) -> Result<T> {
    let _guard = GradGuard::new(false)?;
    Ok(f())
}

/// Sets cuDNN benchmarking for the guard's lifetime.
#[derive(Debug)]
pub struct CudnnBenchmark {
    previous: bool,
}

impl CudnnBenchmark {
    pub fn new(enabled: bool) -> Result<CudnnBenchmark> {
        let previous = call(|| atc_benchmark_cudnn())? != 0;
        call(|| atc_set_benchmark_cudnn(enabled as i32))?;
        Ok(CudnnBenchmark { previous })
    }
}

impl Drop for CudnnBenchmark {
    fn drop(&mut self) {
        let previous = self.previous;
        if let Err(err) = call(|| atc_set_benchmark_cudnn(previous as i32)) {
            tracing::warn!(error = %err, "failed to restore cudnn benchmark mode");
        }
    }
}
