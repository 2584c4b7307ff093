use std::collections::HashMap;
use std::ffi::CString;

use libc::{c_char, c_int, c_void};
use once_cell::sync::Lazy;

use super::util::{malloc_string, path_arg, slice_arg, slice_arg_mut, str_arg};
use super::{register_tensor, tensor, tensors, RtTensor, TENSORS};
use crate::channel::ffi_guard;
use crate::error::BridgeError;
use crate::kind::Kind;
use crate::registry::{Handle, NULL_HANDLE};
use crate::runtime::{Active, Runtime};

/// Invoked once per archive entry by `at_load_callback`. The callee owns the
/// tensor handle.
pub type LoadCallback = extern "C" fn(data: *mut c_void, name: *const c_char, tensor: Handle);

static RUNTIME_NAME: Lazy<CString> = Lazy::new(|| CString::new(Active::NAME).unwrap_or_default());

/// Name of the runtime this library was built against. Static storage;
/// do not free.
#[no_mangle]
pub extern "C" fn at_runtime_name() -> *const c_char {
    RUNTIME_NAME.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn at_manual_seed(seed: i64) {
    ffi_guard((), || {
        Active::manual_seed(seed);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn at_new_tensor() -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(register_tensor(Active::new_tensor())))
}

#[no_mangle]
pub extern "C" fn at_tensor_of_data(
    vs: *const c_void,
    dims: *const i64,
    ndims: usize,
    element_size_in_bytes: usize,
    type_: c_int,
) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let kind = Kind::of_c_int(type_)?;
        let dims = slice_arg(dims, ndims as i64, "dims")?;
        if dims.iter().any(|d| *d < 0) {
            return Err(BridgeError::runtime(format!("negative dimension in {:?}", dims)));
        }
        let len = i64::try_from(element_size_in_bytes)
            .ok()
            .and_then(|elt| dims.iter().try_fold(elt, |acc, &d| acc.checked_mul(d)))
            .ok_or_else(|| BridgeError::runtime(format!("shape {:?} is too large", dims)))?;
        let bytes = slice_arg(vs as *const u8, len, "data")?;
        let t = Active::tensor_of_data(bytes, dims, element_size_in_bytes, kind)?;
        Ok(register_tensor(t))
    })
}

#[no_mangle]
pub extern "C" fn at_copy_data(t: Handle, vs: *mut c_void, numel: usize, element_size_in_bytes: usize) {
    ffi_guard((), || {
        let t = tensor(t)?;
        let len = numel
            .checked_mul(element_size_in_bytes)
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| BridgeError::runtime(format!("{} elements overflow the destination size", numel)))?;
        let dst = slice_arg_mut(vs as *mut u8, len, "destination")?;
        Active::copy_data(&t, dst, numel, element_size_in_bytes)
    })
}

#[no_mangle]
pub extern "C" fn at_shallow_clone(t: Handle) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(register_tensor(tensor(t)?)))
}

#[no_mangle]
pub extern "C" fn at_defined(t: Handle) -> c_int {
    ffi_guard(0, || Ok(Active::defined(&tensor(t)?) as c_int))
}

#[no_mangle]
pub extern "C" fn at_device(t: Handle) -> c_int {
    ffi_guard(0, || Ok(Active::device(&tensor(t)?)?.c_int()))
}

#[no_mangle]
pub extern "C" fn at_dim(t: Handle) -> usize {
    ffi_guard(0, || Ok(Active::shape(&tensor(t)?)?.len()))
}

/// Writes `at_dim(t)` sizes into `dims`.
#[no_mangle]
pub extern "C" fn at_shape(t: Handle, dims: *mut i64) {
    ffi_guard((), || {
        let shape = Active::shape(&tensor(t)?)?;
        let out = slice_arg_mut(dims, shape.len() as i64, "dims")?;
        out.copy_from_slice(&shape);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn at_scalar_type(t: Handle) -> c_int {
    ffi_guard(0, || Ok(Active::kind(&tensor(t)?)?.c_int()))
}

#[no_mangle]
pub extern "C" fn at_requires_grad(t: Handle) -> c_int {
    ffi_guard(0, || Ok(Active::requires_grad(&tensor(t)?)? as c_int))
}

#[no_mangle]
pub extern "C" fn at_set_requires_grad(t: Handle, requires_grad: c_int) {
    ffi_guard((), || Active::set_requires_grad(&tensor(t)?, requires_grad != 0))
}

/// Fresh handle to the accumulated gradient; undefined when there is none.
#[no_mangle]
pub extern "C" fn at_grad(t: Handle) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(register_tensor(Active::grad(&tensor(t)?)?)))
}

#[no_mangle]
pub extern "C" fn at_get(t: Handle, index: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        Ok(register_tensor(Active::get(&tensor(t)?, index as i64)?))
    })
}

#[no_mangle]
pub extern "C" fn at_double_value_at_indexes(t: Handle, indexes: *const i64, indexes_len: c_int) -> f64 {
    ffi_guard(0.0, || {
        let indexes = slice_arg(indexes, indexes_len as i64, "indexes")?;
        Active::double_value_at(&tensor(t)?, indexes)
    })
}

#[no_mangle]
pub extern "C" fn at_int64_value_at_indexes(t: Handle, indexes: *const i64, indexes_len: c_int) -> i64 {
    ffi_guard(0, || {
        let indexes = slice_arg(indexes, indexes_len as i64, "indexes")?;
        Active::int64_value_at(&tensor(t)?, indexes)
    })
}

#[no_mangle]
pub extern "C" fn at_set_double_value_at_indexes(
    t: Handle,
    indexes: *const i64,
    indexes_len: c_int,
    v: f64,
) {
    ffi_guard((), || {
        let indexes = slice_arg(indexes, indexes_len as i64, "indexes")?;
        Active::set_double_value_at(&mut tensor(t)?, indexes, v)
    })
}

#[no_mangle]
pub extern "C" fn at_set_int64_value_at_indexes(
    t: Handle,
    indexes: *const i64,
    indexes_len: c_int,
    v: i64,
) {
    ffi_guard((), || {
        let indexes = slice_arg(indexes, indexes_len as i64, "indexes")?;
        Active::set_int64_value_at(&mut tensor(t)?, indexes, v)
    })
}

#[no_mangle]
pub extern "C" fn at_fill_double(t: Handle, v: f64) {
    ffi_guard((), || Active::fill_double(&mut tensor(t)?, v))
}

#[no_mangle]
pub extern "C" fn at_fill_int64(t: Handle, v: i64) {
    ffi_guard((), || Active::fill_int64(&mut tensor(t)?, v))
}

#[no_mangle]
pub extern "C" fn at_copy_(dst: Handle, src: Handle) {
    ffi_guard((), || {
        let src = tensor(src)?;
        Active::copy_(&mut tensor(dst)?, &src)
    })
}

#[no_mangle]
pub extern "C" fn at_print(t: Handle) {
    ffi_guard((), || {
        println!("{}", Active::to_string(&tensor(t)?, 80)?);
        Ok(())
    })
}

/// `malloc`-allocated rendering of `t`; release with `at_free_string`.
#[no_mangle]
pub extern "C" fn at_to_string(t: Handle, line_size: c_int) -> *mut c_char {
    ffi_guard(std::ptr::null_mut(), || {
        let text = Active::to_string(&tensor(t)?, line_size as i64)?;
        Ok(malloc_string(&text))
    })
}

#[no_mangle]
pub extern "C" fn at_save(t: Handle, filename: *const c_char) {
    ffi_guard((), || {
        let path = path_arg(filename)?;
        Active::save(&tensor(t)?, &path)
    })
}

#[no_mangle]
pub extern "C" fn at_load(filename: *const c_char) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let path = path_arg(filename)?;
        Ok(register_tensor(Active::load(&path)?))
    })
}

fn names_arg(names: *const *const c_char, n: c_int) -> crate::error::Result<Vec<String>> {
    slice_arg(names, n as i64, "names")?
        .iter()
        .map(|p| str_arg(*p, "tensor name").map(str::to_string))
        .collect()
}

#[no_mangle]
pub extern "C" fn at_save_multi(
    tensor_handles: *const Handle,
    tensor_names: *const *const c_char,
    ntensors: c_int,
    filename: *const c_char,
) {
    ffi_guard((), || {
        let path = path_arg(filename)?;
        let ts = tensors(slice_arg(tensor_handles, ntensors as i64, "tensors")?)?;
        let names = names_arg(tensor_names, ntensors)?;
        let named: Vec<(&str, &RtTensor)> = names.iter().map(String::as_str).zip(ts.iter()).collect();
        Active::save_multi(&named, &path)
    })
}

fn load_named(
    names: &[String],
    path: &std::path::Path,
) -> crate::error::Result<Vec<RtTensor>> {
    let mut loaded: HashMap<String, RtTensor> = Active::load_multi(path)?.into_iter().collect();
    names
        .iter()
        .map(|name| {
            loaded.remove(name).ok_or_else(|| {
                BridgeError::runtime(format!("no tensor named {} in {}", name, path.display()))
            })
        })
        .collect()
}

/// Loads the named entries into fresh handles. Every slot must hold the
/// null handle; nothing is written unless every entry loads.
#[no_mangle]
pub extern "C" fn at_load_multi(
    tensor_handles: *mut Handle,
    tensor_names: *const *const c_char,
    ntensors: c_int,
    filename: *const c_char,
) {
    ffi_guard((), || {
        let path = path_arg(filename)?;
        let slots = slice_arg_mut(tensor_handles, ntensors as i64, "tensors")?;
        if let Some(pos) = slots.iter().position(|h| *h != NULL_HANDLE) {
            return Err(BridgeError::protocol(format!(
                "at_load_multi expects null placeholders, slot {} holds handle {}",
                pos, slots[pos]
            )));
        }
        let names = names_arg(tensor_names, ntensors)?;
        let loaded = load_named(&names, &path)?;
        for (slot, t) in slots.iter_mut().zip(loaded) {
            *slot = register_tensor(t);
        }
        Ok(())
    })
}

/// Copies the named entries into the live tensors in `tensor_handles`
/// without recording history.
#[no_mangle]
pub extern "C" fn at_load_multi_(
    tensor_handles: *const Handle,
    tensor_names: *const *const c_char,
    ntensors: c_int,
    filename: *const c_char,
) {
    ffi_guard((), || {
        let path = path_arg(filename)?;
        let mut targets = tensors(slice_arg(tensor_handles, ntensors as i64, "tensors")?)?;
        let names = names_arg(tensor_names, ntensors)?;
        let loaded = load_named(&names, &path)?;
        Active::no_grad(|| {
            for (dst, src) in targets.iter_mut().zip(&loaded) {
                Active::copy_(dst, src)?;
            }
            Ok(())
        })
    })
}

/// Streams every entry of an archive, in file order, to `f`.
#[no_mangle]
pub extern "C" fn at_load_callback(filename: *const c_char, data: *mut c_void, f: Option<LoadCallback>) {
    ffi_guard((), || {
        let path = path_arg(filename)?;
        let f = f.ok_or_else(|| BridgeError::protocol("null load callback"))?;
        for (name, t) in Active::load_multi(&path)? {
            let name = CString::new(name)
                .map_err(|_| BridgeError::runtime("tensor name contains a NUL byte"))?;
            f(data, name.as_ptr(), register_tensor(t));
        }
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn at_load_image(filename: *const c_char) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let path = path_arg(filename)?;
        Ok(register_tensor(Active::load_image(&path)?))
    })
}

/// Returns 0 on success and 1 on failure.
#[no_mangle]
pub extern "C" fn at_save_image(t: Handle, filename: *const c_char) -> c_int {
    ffi_guard(1, || {
        let path = path_arg(filename)?;
        Active::save_image(&tensor(t)?, &path)?;
        Ok(0)
    })
}

#[no_mangle]
pub extern "C" fn at_resize_image(t: Handle, w: c_int, h: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        Ok(register_tensor(Active::resize_image(&tensor(t)?, w as i64, h as i64)?))
    })
}

#[no_mangle]
pub extern "C" fn at_free(t: Handle) {
    ffi_guard((), || {
        TENSORS.remove(t)?;
        Ok(())
    })
}

/// Number of live tensor handles.
#[no_mangle]
pub extern "C" fn at_live_tensors() -> i64 {
    TENSORS.len() as i64
}
