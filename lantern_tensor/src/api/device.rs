use std::sync::atomic::{AtomicBool, Ordering};

use libc::c_int;

use super::flag;
use crate::channel::ffi_guard;
use crate::runtime::{Active, Runtime};

static CUDNN_BENCHMARK: AtomicBool = AtomicBool::new(false);

#[no_mangle]
pub extern "C" fn atc_cuda_device_count() -> c_int {
    ffi_guard(0, || Ok(Active::cuda_device_count()))
}

#[no_mangle]
pub extern "C" fn atc_cuda_is_available() -> c_int {
    ffi_guard(0, || Ok(Active::cuda_is_available() as c_int))
}

#[no_mangle]
pub extern "C" fn atc_cudnn_is_available() -> c_int {
    ffi_guard(0, || Ok(Active::cudnn_is_available() as c_int))
}

#[no_mangle]
pub extern "C" fn atc_set_benchmark_cudnn(b: c_int) {
    ffi_guard((), || {
        let enabled = flag(b);
        Active::set_benchmark_cudnn(enabled);
        CUDNN_BENCHMARK.store(enabled, Ordering::SeqCst);
        Ok(())
    })
}

/// Last value passed to `atc_set_benchmark_cudnn` (initially off).
#[no_mangle]
pub extern "C" fn atc_benchmark_cudnn() -> c_int {
    CUDNN_BENCHMARK.load(Ordering::SeqCst) as c_int
}
