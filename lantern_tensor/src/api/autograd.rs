use libc::c_int;

use super::util::{slice_arg, slice_arg_mut};
use super::{flag, register_tensor, tensor, tensors};
use crate::channel::ffi_guard;
use crate::registry::Handle;
use crate::runtime::{Active, Runtime};

/// Single-root backward accumulating into every reachable leaf.
#[no_mangle]
pub extern "C" fn at_backward(t: Handle, keep_graph: c_int, create_graph: c_int) {
    ffi_guard((), || {
        let root = tensor(t)?;
        Active::run_backward(&[&root], &[], flag(keep_graph), flag(create_graph))?;
        Ok(())
    })
}

/// Backward from `ntensors` roots. With `ninputs == 0` gradients accumulate
/// into leaves and `outputs` is untouched; otherwise one fresh gradient
/// handle per input is written to `outputs`.
#[no_mangle]
pub extern "C" fn at_run_backward(
    tensor_handles: *const Handle,
    ntensors: c_int,
    input_handles: *const Handle,
    ninputs: c_int,
    outputs: *mut Handle,
    keep_graph: c_int,
    create_graph: c_int,
) {
    ffi_guard((), || {
        let roots = tensors(slice_arg(tensor_handles, ntensors as i64, "tensors")?)?;
        let inputs = tensors(slice_arg(input_handles, ninputs as i64, "inputs")?)?;
        let out = slice_arg_mut(outputs, ninputs as i64, "outputs")?;
        let root_refs: Vec<_> = roots.iter().collect();
        let input_refs: Vec<_> = inputs.iter().collect();
        let grads = Active::run_backward(&root_refs, &input_refs, flag(keep_graph), flag(create_graph))?;
        for (slot, grad) in out.iter_mut().zip(grads) {
            *slot = register_tensor(grad);
        }
        Ok(())
    })
}

/// Sets the process-wide recording flag and returns the previous value.
#[no_mangle]
pub extern "C" fn at_grad_set_enabled(b: c_int) -> c_int {
    ffi_guard(0, || Ok(Active::grad_set_enabled(flag(b))? as c_int))
}
