use std::sync::Arc;

use libc::{c_char, c_int};

use super::util::{path_arg, slice_arg};
use super::{register_tensor, tensor, tensors, RtTensor, MODULES, VALUES};
use crate::channel::ffi_guard;
use crate::registry::{Handle, NULL_HANDLE};
use crate::runtime::{Active, Runtime};
use crate::value::CallValue;

#[no_mangle]
pub extern "C" fn atm_load(filename: *const c_char) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let path = path_arg(filename)?;
        let module = Active::load_module(&path)?;
        Ok(MODULES.insert(Arc::new(module)))
    })
}

/// Calls the module on tensors; the result must be a tensor.
#[no_mangle]
pub extern "C" fn atm_forward(m: Handle, tensor_handles: *const Handle, ntensors: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let module = MODULES.get(m)?;
        let inputs = tensors(slice_arg(tensor_handles, ntensors as i64, "tensors")?)?;
        let refs: Vec<_> = inputs.iter().collect();
        Ok(register_tensor(Active::forward(&module, &refs)?))
    })
}

/// Calls the module on call values. Tensors in the result get fresh
/// handles owned by the returned value; `ati_free_deep` releases them.
#[no_mangle]
pub extern "C" fn atm_forward_(m: Handle, ivalues: *const Handle, nivalues: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let module = MODULES.get(m)?;
        let args = slice_arg(ivalues, nivalues as i64, "ivalues")?
            .iter()
            .map(|h| VALUES.get(*h)?.try_map(&mut |t: &Handle| tensor(*t)))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let out = Active::forward_values(&module, &args)?;
        let out: CallValue<Handle> =
            out.try_map(&mut |t: &RtTensor| Ok(register_tensor(Active::shallow_clone(t))))?;
        Ok(VALUES.insert(out))
    })
}

#[no_mangle]
pub extern "C" fn atm_free(m: Handle) {
    ffi_guard((), || {
        MODULES.remove(m)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn atm_live_modules() -> i64 {
    MODULES.len() as i64
}
