//! C ABI boundary over a tensor, autograd and JIT runtime.
//!
//! Runtime objects cross the boundary as non-zero `i64` handles. Each
//! handle has exactly one teardown (`at_free`, `ats_free`, `ato_free`,
//! `atm_free`, `ati_free`/`ati_free_deep`). Failing calls return a sentinel
//! and leave a description in a per-thread slot, read and cleared by
//! `get_and_reset_last_err`.

pub mod api;
pub mod channel;
pub mod error;
pub mod kind;
pub mod registry;
pub mod runtime;
pub mod scalar;
pub mod value;

pub use api::autograd::*;
pub use api::device::*;
pub use api::ivalue::*;
pub use api::module::*;
pub use api::ops::*;
pub use api::optim::*;
pub use api::scalar::*;
pub use api::tensor::*;
pub use api::util::at_free_string;
pub use channel::{at_last_err_kind, get_and_reset_last_err, last_error_kind, take_last_error};
pub use error::{BridgeError, Result};
pub use kind::{Device, Kind};
pub use registry::{Handle, NULL_HANDLE};
pub use scalar::Scalar;
pub use value::{CallValue, Tag};
