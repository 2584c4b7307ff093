//! Call values. A tensor variant refers to a tensor handle; it does not
//! copy the tensor. `ati_free` releases only the value, `ati_free_deep`
//! also releases every tensor handle it refers to.

use libc::c_int;

use super::util::{slice_arg, slice_arg_mut};
use super::{register_tensor, tensor, TENSORS, VALUES};
use crate::channel::ffi_guard;
use crate::error::{BridgeError, Result};
use crate::registry::{Handle, NULL_HANDLE};
use crate::value::CallValue;

#[no_mangle]
pub extern "C" fn ati_tensor(t: Handle) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        TENSORS.with(t, |_| ())?;
        Ok(VALUES.insert(CallValue::Tensor(t)))
    })
}

#[no_mangle]
pub extern "C" fn ati_int(v: i64) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(VALUES.insert(CallValue::Int(v))))
}

#[no_mangle]
pub extern "C" fn ati_double(v: f64) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(VALUES.insert(CallValue::Double(v))))
}

/// Builds a tuple from copies of the element values; the caller keeps
/// ownership of `values`.
#[no_mangle]
pub extern "C" fn ati_tuple(values: *const Handle, nvalues: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let items = slice_arg(values, nvalues as i64, "ivalues")?
            .iter()
            .map(|h| VALUES.get(*h))
            .collect::<Result<Vec<_>>>()?;
        Ok(VALUES.insert(CallValue::Tuple(items)))
    })
}

/// Tag code of the value, or -1 on failure.
#[no_mangle]
pub extern "C" fn ati_tag(v: Handle) -> c_int {
    ffi_guard(-1, || Ok(VALUES.with(v, |value| value.tag())?.c_int()))
}

/// Fresh tensor handle sharing storage with the referenced tensor.
#[no_mangle]
pub extern "C" fn ati_to_tensor(v: Handle) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let referenced = VALUES.with(v, |value| value.as_tensor().copied())??;
        Ok(register_tensor(tensor(referenced)?))
    })
}

#[no_mangle]
pub extern "C" fn ati_to_int(v: Handle) -> i64 {
    ffi_guard(0, || VALUES.with(v, |value| value.as_int())?)
}

#[no_mangle]
pub extern "C" fn ati_to_double(v: Handle) -> f64 {
    ffi_guard(0.0, || VALUES.with(v, |value| value.as_double())?)
}

#[no_mangle]
pub extern "C" fn ati_tuple_length(v: Handle) -> c_int {
    ffi_guard(0, || {
        let len = VALUES.with(v, |value| value.as_tuple().map(<[_]>::len))??;
        Ok(len as c_int)
    })
}

/// Writes one fresh value handle per element. `noutputs` must equal the
/// tuple length.
#[no_mangle]
pub extern "C" fn ati_to_tuple(v: Handle, outputs: *mut Handle, noutputs: c_int) {
    ffi_guard((), || {
        let items = VALUES.with(v, |value| value.as_tuple().map(<[_]>::to_vec))??;
        if items.len() != noutputs as usize || noutputs < 0 {
            return Err(BridgeError::protocol(format!(
                "ati_to_tuple: buffer holds {} slots for a tuple of length {}",
                noutputs,
                items.len()
            )));
        }
        let out = slice_arg_mut(outputs, noutputs as i64, "outputs")?;
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = VALUES.insert(item);
        }
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn ati_free(v: Handle) {
    ffi_guard((), || {
        VALUES.remove(v)?;
        Ok(())
    })
}

/// Releases the value and every tensor handle it refers to. Every handle
/// is attempted; the first failure is reported.
#[no_mangle]
pub extern "C" fn ati_free_deep(v: Handle) {
    ffi_guard((), || {
        let value = VALUES.remove(v)?;
        let mut first_err = None;
        for t in value.tensors() {
            if let Err(err) = TENSORS.remove(*t) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

#[no_mangle]
pub extern "C" fn ati_live_values() -> i64 {
    VALUES.len() as i64
}
