//! A subset of the generated tensor ops, enough to build differentiable
//! expressions from C.

use libc::c_int;

use super::util::slice_arg;
use super::{register_tensor, tensor, RtTensor, SCALARS};
use crate::channel::ffi_guard;
use crate::error::Result;
use crate::kind::Kind;
use crate::registry::{Handle, NULL_HANDLE};
use crate::runtime::{Active, Runtime};

type UnaryOp = fn(&RtTensor) -> Result<RtTensor>;
type BinaryOp = fn(&RtTensor, &RtTensor) -> Result<RtTensor>;

fn binary(a: Handle, b: Handle, op: BinaryOp) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let (a, b) = (tensor(a)?, tensor(b)?);
        Ok(register_tensor(op(&a, &b)?))
    })
}

fn unary(t: Handle, op: UnaryOp) -> Handle {
    ffi_guard(NULL_HANDLE, || Ok(register_tensor(op(&tensor(t)?)?)))
}

#[no_mangle]
pub extern "C" fn atg_add(a: Handle, b: Handle) -> Handle {
    binary(a, b, Active::add)
}

#[no_mangle]
pub extern "C" fn atg_sub(a: Handle, b: Handle) -> Handle {
    binary(a, b, Active::sub)
}

#[no_mangle]
pub extern "C" fn atg_mul(a: Handle, b: Handle) -> Handle {
    binary(a, b, Active::mul)
}

#[no_mangle]
pub extern "C" fn atg_matmul(a: Handle, b: Handle) -> Handle {
    binary(a, b, Active::matmul)
}

#[no_mangle]
pub extern "C" fn atg_mul_scalar(t: Handle, s: Handle) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let s = SCALARS.get(s)?;
        Ok(register_tensor(Active::mul_scalar(&tensor(t)?, s)?))
    })
}

#[no_mangle]
pub extern "C" fn atg_neg(t: Handle) -> Handle {
    unary(t, Active::neg)
}

#[no_mangle]
pub extern "C" fn atg_sum(t: Handle) -> Handle {
    unary(t, Active::sum)
}

#[no_mangle]
pub extern "C" fn atg_mean(t: Handle) -> Handle {
    unary(t, Active::mean)
}

#[no_mangle]
pub extern "C" fn atg_ones_like(t: Handle) -> Handle {
    unary(t, Active::ones_like)
}

#[no_mangle]
pub extern "C" fn atg_zeros(dims: *const i64, ndims: c_int, kind: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let dims = slice_arg(dims, ndims as i64, "dims")?;
        Ok(register_tensor(Active::zeros(dims, Kind::of_c_int(kind)?)?))
    })
}

/// Uniform samples in `[0, 1)` drawn from the seeded generator.
#[no_mangle]
pub extern "C" fn atg_rand(dims: *const i64, ndims: c_int, kind: c_int) -> Handle {
    ffi_guard(NULL_HANDLE, || {
        let dims = slice_arg(dims, ndims as i64, "dims")?;
        Ok(register_tensor(Active::rand(dims, Kind::of_c_int(kind)?)?))
    })
}
