use std::path::Path;

use lantern_tensor::{atm_forward, atm_forward_, atm_free, atm_load, Handle};

use crate::error::{call, Result};
use crate::ivalue::{IValue, RawValue};
use crate::tensor::Tensor;
use crate::util::{c_len, path_cstring};

/// A loaded module. Stateless across calls.
#[derive(Debug)]
pub struct CModule {
    handle: Handle,
}

impl CModule {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CModule> {
        let path = path_cstring(path.as_ref())?;
        Ok(CModule {
            handle: call(|| atm_load(path.as_ptr()))?,
        })
    }

    /// Runs the module on tensors; the result must be a tensor.
    pub fn forward_ts(&self, inputs: &[&Tensor]) -> Result<Tensor> {
        let handles: Vec<Handle> = inputs.iter().map(|t| t.handle()).collect();
        let n = c_len("inputs", handles.len())?;
        let out = call(|| atm_forward(self.handle, handles.as_ptr(), n))?;
        Ok(Tensor::from_handle(out))
    }

    /// Runs the module on call values.
    pub fn forward_is(&self, inputs: &[IValue]) -> Result<IValue> {
        let raw = inputs.iter().map(IValue::to_raw).collect::<Result<Vec<_>>>()?;
        let handles: Vec<Handle> = raw.iter().map(RawValue::handle).collect();
        let n = c_len("inputs", handles.len())?;
        let out = RawValue::deep(call(|| atm_forward_(self.handle, handles.as_ptr(), n))?);
        IValue::from_raw(out.handle())
    }
}

impl Drop for CModule {
    fn drop(&mut self) {
        if let Err(err) = call(|| atm_free(self.handle)) {
            tracing::warn!(handle = self.handle, error = %err, "failed to release module");
        }
    }
}
