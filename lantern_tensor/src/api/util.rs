//! Marshalling helpers for raw C arguments.

use std::ffi::CStr;
use std::path::PathBuf;

use libc::{c_char, c_void};

use crate::error::{BridgeError, Result};

/// Copies `s` into a NUL-terminated `malloc` allocation. Interior NULs are
/// dropped. Returns null if allocation fails.
pub(crate) fn malloc_string(s: &str) -> *mut c_char {
    let bytes: Vec<u8> = s.bytes().filter(|b| *b != 0).collect();
    unsafe {
        let ptr = libc::malloc(bytes.len() + 1) as *mut u8;
        if ptr.is_null() {
            return ptr as *mut c_char;
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        *ptr.add(bytes.len()) = 0;
        ptr as *mut c_char
    }
}

/// Releases a string returned by this library.
#[no_mangle]
pub extern "C" fn at_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe { libc::free(s as *mut c_void) };
    }
}

pub(crate) fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(BridgeError::protocol(format!("null {} string", what)));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BridgeError::protocol(format!("{} is not valid UTF-8", what)))
}

pub(crate) fn path_arg(ptr: *const c_char) -> Result<PathBuf> {
    Ok(PathBuf::from(str_arg(ptr, "path")?))
}

/// Borrows `len` elements at `ptr`. A null pointer is only valid for an
/// empty slice.
pub(crate) fn slice_arg<'a, T>(ptr: *const T, len: i64, what: &str) -> Result<&'a [T]> {
    if len < 0 {
        return Err(BridgeError::protocol(format!("negative {} length {}", what, len)));
    }
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(BridgeError::protocol(format!("null {} array", what)));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
}

pub(crate) fn slice_arg_mut<'a, T>(ptr: *mut T, len: i64, what: &str) -> Result<&'a mut [T]> {
    if len < 0 {
        return Err(BridgeError::protocol(format!("negative {} length {}", what, len)));
    }
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(BridgeError::protocol(format!("null {} array", what)));
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len as usize) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_string_is_nul_terminated() {
        let p = malloc_string("abc");
        let s = unsafe { CStr::from_ptr(p) }.to_str().unwrap().to_string();
        at_free_string(p);
        assert_eq!(s, "abc");
    }

    #[test]
    fn null_arrays_only_for_empty_slices() {
        let empty: &[i64] = slice_arg(std::ptr::null(), 0, "dims").unwrap();
        assert!(empty.is_empty());
        assert!(slice_arg::<i64>(std::ptr::null(), 2, "dims").is_err());
        assert!(slice_arg::<i64>(std::ptr::null(), -1, "dims").is_err());
    }
}
