//! Per-thread error slot shared by every entry point.
//!
//! A failing call stores its error here and returns a sentinel. The caller
//! drains the slot with `get_and_reset_last_err`. Successful calls leave an
//! unread error in place; a later failure overwrites it.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use libc::{c_char, c_int};

use crate::api::util::malloc_string;
use crate::error::{BridgeError, Result};

thread_local! {
    static LAST_ERROR: RefCell<Option<BridgeError>> = const { RefCell::new(None) };
}

pub(crate) fn set_error(err: BridgeError) {
    tracing::debug!(error = %err, "boundary call failed");
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(err);
    });
}

/// Drains the calling thread's slot, returning the typed error.
pub fn take_last_error() -> Option<BridgeError> {
    LAST_ERROR.with(|cell| cell.borrow_mut().take())
}

/// Kind code of the pending error without draining it (0 when empty).
pub fn last_error_kind() -> i32 {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(0, BridgeError::code))
}

/// Runs `f`, converting both errors and panics into a channel entry plus
/// `default`. Nothing unwinds past this point.
pub(crate) fn ffi_guard<T, F>(default: T, f: F) -> T
where
    F: FnOnce() -> Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => v,
        Ok(Err(err)) => {
            set_error(err);
            default
        }
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.as_str()
            } else {
                "panic across FFI boundary"
            };
            set_error(BridgeError::Runtime(format!("panic: {}", msg)));
            default
        }
    }
}

/// Returns the pending error description and clears the slot, or null when
/// nothing failed since the last read. The string is `malloc`-allocated:
/// release it with `free` or `at_free_string`.
#[no_mangle]
pub extern "C" fn get_and_reset_last_err() -> *mut c_char {
    match take_last_error() {
        Some(err) => malloc_string(&err.to_string()),
        None => std::ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn at_last_err_kind() -> c_int {
    last_error_kind()
}
