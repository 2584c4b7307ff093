#![allow(dead_code)]

use std::ffi::{CStr, CString};
use std::path::Path;

use lantern_tensor::*;
use libc::c_void;

pub const DOUBLE: i32 = 7;
pub const INT64: i32 = 4;

pub fn last_err() -> Option<String> {
    let ptr = get_and_reset_last_err();
    if ptr.is_null() {
        return None;
    }
    let msg = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    at_free_string(ptr);
    Some(msg)
}

pub fn clear_err() {
    let _ = last_err();
}

pub fn doubles(values: &[f64], dims: &[i64]) -> Handle {
    let t = at_tensor_of_data(values.as_ptr() as *const c_void, dims.as_ptr(), dims.len(), 8, DOUBLE);
    assert_ne!(t, NULL_HANDLE, "{:?}", last_err());
    t
}

pub fn int64s(values: &[i64], dims: &[i64]) -> Handle {
    let t = at_tensor_of_data(values.as_ptr() as *const c_void, dims.as_ptr(), dims.len(), 8, INT64);
    assert_ne!(t, NULL_HANDLE, "{:?}", last_err());
    t
}

pub fn shape(t: Handle) -> Vec<i64> {
    let mut dims = vec![0i64; at_dim(t)];
    at_shape(t, dims.as_mut_ptr());
    dims
}

pub fn read_doubles(t: Handle) -> Vec<f64> {
    let numel: i64 = shape(t).iter().product();
    let mut out = vec![0f64; numel as usize];
    at_copy_data(t, out.as_mut_ptr() as *mut c_void, numel as usize, 8);
    out
}

pub fn value_at(t: Handle, indexes: &[i64]) -> f64 {
    at_double_value_at_indexes(t, indexes.as_ptr(), indexes.len() as i32)
}

pub fn cstring(path: &Path) -> CString {
    CString::new(path.to_str().unwrap()).unwrap()
}

pub fn leaf(values: &[f64], dims: &[i64]) -> Handle {
    let t = doubles(values, dims);
    at_set_requires_grad(t, 1);
    assert_eq!(last_err(), None);
    t
}
