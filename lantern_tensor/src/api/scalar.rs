use libc::c_char;

use super::util::malloc_string;
use super::SCALARS;
use crate::channel::ffi_guard;
use crate::registry::{Handle, NULL_HANDLE};
use crate::scalar::Scalar;

#[no_mangle]
pub extern "C" fn ats_int(v: i64) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(SCALARS.insert(Scalar::Int(v))))
}

#[no_mangle]
pub extern "C" fn ats_float(v: f64) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(SCALARS.insert(Scalar::Float(v))))
}

#[no_mangle]
pub extern "C" fn ats_to_int(s: Handle) -> i64 {
    ffi_guard(0, || Ok(SCALARS.get(s)?.to_int()))
}

#[no_mangle]
pub extern "C" fn ats_to_float(s: Handle) -> f64 {
    ffi_guard(0.0, || Ok(SCALARS.get(s)?.to_float()))
}

#[no_mangle]
pub extern "C" fn ats_to_string(s: Handle) -> *mut c_char {
    ffi_guard(std::ptr::null_mut(), || Ok(malloc_string(&SCALARS.get(s)?.to_string())))
}

#[no_mangle]
pub extern "C" fn ats_free(s: Handle) {
    ffi_guard((), || {
        SCALARS.remove(s)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn ats_live_scalars() -> i64 {
    SCALARS.len() as i64
}
