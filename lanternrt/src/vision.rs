//! Image files as `[height, width, channels]` `Uint8` tensors.

use std::path::Path;

use lantern_tensor::{at_load_image, at_resize_image, at_save_image};

use crate::error::{call, Result};
use crate::tensor::Tensor;
use crate::util::{c_arg, path_cstring};

pub fn load<P: AsRef<Path>>(path: P) -> Result<Tensor> {
    let path = path_cstring(path.as_ref())?;
    Ok(Tensor::from_handle(call(|| at_load_image(path.as_ptr()))?))
}

/// The format follows the file extension.
pub fn save<P: AsRef<Path>>(t: &Tensor, path: P) -> Result<()> {
    let path = path_cstring(path.as_ref())?;
    call(|| at_save_image(t.handle(), path.as_ptr()))?;
    Ok(())
}

pub fn resize(t: &Tensor, width: i64, height: i64) -> Result<Tensor> {
    let width = c_arg("width", width)?;
    let height = c_arg("height", height)?;
    let handle = call(|| at_resize_image(t.handle(), width, height))?;
    Ok(Tensor::from_handle(handle))
}
