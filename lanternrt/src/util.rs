use std::ffi::{CStr, CString};
use std::path::Path;

use libc::c_char;

use crate::error::{Error, Result};

pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    let text = path
        .to_str()
        .ok_or_else(|| Error::Runtime(format!("path is not valid UTF-8: {}", path.display())))?;
    Ok(CString::new(text)?)
}

/// Copies and releases a string allocated by the boundary.
pub(crate) fn take_c_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    lantern_tensor::at_free_string(ptr);
    Some(text)
}

/// A count passed as a C `int`.
pub(crate) fn c_len(what: &'static str, len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::Runtime(format!("{}: {} entries exceed the C int range", what, len)))
}

/// A scalar argument passed as a C `int`.
pub(crate) fn c_arg(what: &'static str, v: i64) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::Runtime(format!("{} {} is outside the C int range", what, v)))
}
