use std::fmt;

use lantern_tensor::{ats_float, ats_free, ats_int, ats_to_float, ats_to_int, ats_to_string, Handle};

use crate::error::{call, Result};
use crate::util::take_c_string;

/// An owned, immutable runtime scalar.
pub struct Scalar {
    handle: Handle,
}

impl Scalar {
    pub fn int(v: i64) -> Result<Scalar> {
        Ok(Scalar { handle: call(|| ats_int(v))? })
    }

    pub fn float(v: f64) -> Result<Scalar> {
        Ok(Scalar { handle: call(|| ats_float(v))? })
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    /// Floats truncate toward zero.
    pub fn to_int(&self) -> Result<i64> {
        call(|| ats_to_int(self.handle))
    }

    pub fn to_float(&self) -> Result<f64> {
        call(|| ats_to_float(self.handle))
    }
}

impl Drop for Scalar {
    fn drop(&mut self) {
        if let Err(err) = call(|| ats_free(self.handle)) {
            tracing::warn!(handle = self.handle, error = %err, "failed to release scalar");
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = call(|| ats_to_string(self.handle)).map_err(|_| fmt::Error)?;
        f.write_str(&take_c_string(ptr).ok_or(fmt::Error)?)
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", self)
    }
}
