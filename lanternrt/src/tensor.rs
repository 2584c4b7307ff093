//! Owned tensor handles.
//!
//! A `Tensor` owns exactly one boundary handle and releases it on drop.
//! It is move-only: a second handle to the same storage comes from
//! `shallow_clone`, never from `Clone`.
//!
//! Releasing a handle twice does not compile:
//!
//! ```compile_fail
//! let t = lanternrt::Tensor::of_slice(&[1.0f64]).unwrap();
//! drop(t);
//! drop(t);
//! ```

use std::ffi::{CStr, CString};
use std::fmt;
use std::path::Path;

use lantern_tensor::*;
use libc::{c_char, c_void};

use crate::error::{call, Error, Result};
use crate::scalar::Scalar;
use crate::util::{c_arg, c_len, path_cstring, take_c_string};

/// Host element types that can be copied in and out of tensors.
pub trait Element: Copy + Default {
    const KIND: Kind;
}

macro_rules! element {
    ($ty:ty, $kind:ident) => {
        impl Element for $ty {
            const KIND: Kind = Kind::$kind;
        }
    };
}

element!(u8, Uint8);
element!(i8, Int8);
element!(i16, Int16);
element!(i32, Int);
element!(i64, Int64);
element!(f32, Float);
element!(f64, Double);

pub struct Tensor {
    handle: Handle,
}

impl Tensor {
    pub(crate) fn from_handle(handle: Handle) -> Tensor {
        Tensor { handle }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    /// An undefined tensor.
    pub fn new() -> Result<Tensor> {
        Ok(Tensor::from_handle(call(|| at_new_tensor())?))
    }

    pub fn of_slice<T: Element>(data: &[T]) -> Result<Tensor> {
        Tensor::of_data(data, &[data.len() as i64])
    }

    /// Copies `data` into a fresh tensor of shape `dims`.
    pub fn of_data<T: Element>(data: &[T], dims: &[i64]) -> Result<Tensor> {
        let expected = dims
            .iter()
            .try_fold(1i64, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| Error::Runtime(format!("shape {:?} overflows the element count", dims)))?
            .max(0) as usize;
        if expected != data.len() {
            return Err(Error::Length {
                what: "tensor data",
                expected,
                actual: data.len(),
            });
        }
        let handle = call(|| {
            at_tensor_of_data(
                data.as_ptr() as *const c_void,
                dims.as_ptr(),
                dims.len(),
                std::mem::size_of::<T>(),
                T::KIND.c_int(),
            )
        })?;
        Ok(Tensor::from_handle(handle))
    }

    pub fn zeros(dims: &[i64], kind: Kind) -> Result<Tensor> {
        let ndims = c_len("dims", dims.len())?;
        let handle = call(|| atg_zeros(dims.as_ptr(), ndims, kind.c_int()))?;
        Ok(Tensor::from_handle(handle))
    }

    /// Uniform samples in `[0, 1)` from the generator seeded by `manual_seed`.
    pub fn rand(dims: &[i64], kind: Kind) -> Result<Tensor> {
        let ndims = c_len("dims", dims.len())?;
        let handle = call(|| atg_rand(dims.as_ptr(), ndims, kind.c_int()))?;
        Ok(Tensor::from_handle(handle))
    }

    pub fn ones_like(&self) -> Result<Tensor> {
        self.unary(atg_ones_like)
    }

    /// A second handle sharing storage and autograd identity with `self`.
    pub fn shallow_clone(&self) -> Result<Tensor> {
        self.unary(at_shallow_clone)
    }

    pub fn defined(&self) -> Result<bool> {
        Ok(call(|| at_defined(self.handle))? != 0)
    }

    pub fn device(&self) -> Result<Device> {
        Ok(Device::of_c_int(call(|| at_device(self.handle))?))
    }

    pub fn dim(&self) -> Result<usize> {
        call(|| at_dim(self.handle))
    }

    pub fn size(&self) -> Result<Vec<i64>> {
        let mut dims = vec![0i64; self.dim()?];
        call(|| at_shape(self.handle, dims.as_mut_ptr()))?;
        Ok(dims)
    }

    pub fn numel(&self) -> Result<usize> {
        Ok(self.size()?.iter().product::<i64>() as usize)
    }

    pub fn kind(&self) -> Result<Kind> {
        let code = call(|| at_scalar_type(self.handle))?;
        Ok(Kind::of_c_int(code)?)
    }

    pub fn requires_grad(&self) -> Result<bool> {
        Ok(call(|| at_requires_grad(self.handle))? != 0)
    }

    pub fn set_requires_grad(&self, requires_grad: bool) -> Result<()> {
        call(|| at_set_requires_grad(self.handle, requires_grad as i32))
    }

    /// The accumulated gradient; undefined when backward never reached it.
    pub fn grad(&self) -> Result<Tensor> {
        self.unary(at_grad)
    }

    /// View of row `index` along the first dimension.
    pub fn get(&self, index: i64) -> Result<Tensor> {
        let index = c_arg("index", index)?;
        let handle = call(|| at_get(self.handle, index))?;
        Ok(Tensor::from_handle(handle))
    }

    pub fn double_value(&self, indexes: &[i64]) -> Result<f64> {
        let n = c_len("indexes", indexes.len())?;
        call(|| at_double_value_at_indexes(self.handle, indexes.as_ptr(), n))
    }

    pub fn int64_value(&self, indexes: &[i64]) -> Result<i64> {
        let n = c_len("indexes", indexes.len())?;
        call(|| at_int64_value_at_indexes(self.handle, indexes.as_ptr(), n))
    }

    pub fn set_double_value(&mut self, indexes: &[i64], v: f64) -> Result<()> {
        let n = c_len("indexes", indexes.len())?;
        call(|| at_set_double_value_at_indexes(self.handle, indexes.as_ptr(), n, v))
    }

    pub fn set_int64_value(&mut self, indexes: &[i64], v: i64) -> Result<()> {
        let n = c_len("indexes", indexes.len())?;
        call(|| at_set_int64_value_at_indexes(self.handle, indexes.as_ptr(), n, v))
    }

    pub fn fill_double(&mut self, v: f64) -> Result<()> {
        call(|| at_fill_double(self.handle, v))
    }

    pub fn fill_int64(&mut self, v: i64) -> Result<()> {
        call(|| at_fill_int64(self.handle, v))
    }

    /// Copies `src` into `self`, broadcasting and converting as needed.
    pub fn copy_(&mut self, src: &Tensor) -> Result<()> {
        call(|| at_copy_(self.handle, src.handle))
    }

    /// Copies every element out. `T` must match the tensor's kind.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let kind = self.kind()?;
        if kind != T::KIND {
            return Err(Error::Runtime(format!(
                "cannot read a {:?} tensor as {:?}",
                kind,
                T::KIND
            )));
        }
        let numel = self.numel()?;
        let mut out = vec![T::default(); numel];
        call(|| {
            at_copy_data(
                self.handle,
                out.as_mut_ptr() as *mut c_void,
                numel,
                std::mem::size_of::<T>(),
            )
        })?;
        Ok(out)
    }

    pub fn to_string(&self, line_size: i64) -> Result<String> {
        let line_size = c_arg("line size", line_size)?;
        let ptr = call(|| at_to_string(self.handle, line_size))?;
        take_c_string(ptr).ok_or_else(|| Error::Runtime("tensor rendering returned null".into()))
    }

    pub fn print(&self) -> Result<()> {
        call(|| at_print(self.handle))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path_cstring(path.as_ref())?;
        call(|| at_save(self.handle, path.as_ptr()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Tensor> {
        let path = path_cstring(path.as_ref())?;
        Ok(Tensor::from_handle(call(|| at_load(path.as_ptr()))?))
    }

    pub fn save_multi<S: AsRef<str>, P: AsRef<Path>>(named: &[(S, &Tensor)], path: P) -> Result<()> {
        let path = path_cstring(path.as_ref())?;
        let names = named
            .iter()
            .map(|(name, _)| CString::new(name.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let name_ptrs: Vec<*const c_char> = names.iter().map(|n| n.as_ptr()).collect();
        let handles: Vec<Handle> = named.iter().map(|(_, t)| t.handle).collect();
        let n = c_len("tensors", handles.len())?;
        call(|| at_save_multi(handles.as_ptr(), name_ptrs.as_ptr(), n, path.as_ptr()))
    }

    /// Every entry of an archive with its name, in file order.
    pub fn load_multi<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Tensor)>> {
        let path = path_cstring(path.as_ref())?;
        let mut entries: Vec<(String, Tensor)> = Vec::new();
        call(|| {
            at_load_callback(
                path.as_ptr(),
                &mut entries as *mut Vec<(String, Tensor)> as *mut c_void,
                Some(collect_entry),
            )
        })?;
        Ok(entries)
    }

    /// Overwrites each named tensor in place with the archive entry of the
    /// same name, without recording history.
    pub fn load_multi_into<P: AsRef<Path>>(named: &mut [(&str, &mut Tensor)], path: P) -> Result<()> {
        let path = path_cstring(path.as_ref())?;
        let names = named
            .iter()
            .map(|(name, _)| CString::new(*name))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let name_ptrs: Vec<*const c_char> = names.iter().map(|n| n.as_ptr()).collect();
        let handles: Vec<Handle> = named.iter().map(|(_, t)| t.handle).collect();
        let n = c_len("tensors", handles.len())?;
        call(|| at_load_multi_(handles.as_ptr(), name_ptrs.as_ptr(), n, path.as_ptr()))
    }

    pub fn backward(&self) -> Result<()> {
        call(|| at_backward(self.handle, 0, 0))
    }

    /// Backward from `roots`. With empty `inputs` gradients accumulate into
    /// leaves and the result is empty; otherwise one gradient per input.
    pub fn run_backward(
        roots: &[&Tensor],
        inputs: &[&Tensor],
        keep_graph: bool,
        create_graph: bool,
    ) -> Result<Vec<Tensor>> {
        let roots: Vec<Handle> = roots.iter().map(|t| t.handle).collect();
        let inputs: Vec<Handle> = inputs.iter().map(|t| t.handle).collect();
        let mut outputs = vec![NULL_HANDLE; inputs.len()];
        let nroots = c_len("roots", roots.len())?;
        let ninputs = c_len("inputs", inputs.len())?;
        call(|| {
            at_run_backward(
                roots.as_ptr(),
                nroots,
                inputs.as_ptr(),
                ninputs,
                outputs.as_mut_ptr(),
                keep_graph as i32,
                create_graph as i32,
            )
        })?;
        Ok(outputs.into_iter().map(Tensor::from_handle).collect())
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, atg_add)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, atg_sub)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, atg_mul)
    }

    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary(other, atg_matmul)
    }

    pub fn mul_scalar(&self, s: &Scalar) -> Result<Tensor> {
        let handle = call(|| atg_mul_scalar(self.handle, s.handle()))?;
        Ok(Tensor::from_handle(handle))
    }

    pub fn neg(&self) -> Result<Tensor> {
        self.unary(atg_neg)
    }

    pub fn sum(&self) -> Result<Tensor> {
        self.unary(atg_sum)
    }

    pub fn mean(&self) -> Result<Tensor> {
        self.unary(atg_mean)
    }

    fn unary(&self, f: extern "C" fn(Handle) -> Handle) -> Result<Tensor> {
        Ok(Tensor::from_handle(call(|| f(self.handle))?))
    }

    fn binary(&self, other: &Tensor, f: extern "C" fn(Handle, Handle) -> Handle) -> Result<Tensor> {
        Ok(Tensor::from_handle(call(|| f(self.handle, other.handle))?))
    }
}

extern "C" fn collect_entry(data: *mut c_void, name: *const c_char, t: Handle) {
    let entries = unsafe { &mut *(data as *mut Vec<(String, Tensor)>) };
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    entries.push((name, Tensor::from_handle(t)));
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if let Err(err) = call(|| at_free(self.handle)) {
            tracing::warn!(handle = self.handle, error = %err, "failed to release tensor");
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind(), self.size()) {
            (Ok(kind), Ok(size)) => write!(f, "Tensor[{:?}, {:?}]", size, kind),
            _ => write!(f, "Tensor[undefined]"),
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = Tensor::to_string(self, 80).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_and_kind_read_back() {
        let t = Tensor::of_data(&[1i64, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        assert_eq!(t.size().unwrap(), vec![2, 3]);
        assert_eq!(t.kind().unwrap(), Kind::Int64);
        assert_eq!(t.to_vec::<i64>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn new_tensor_is_undefined() {
        assert!(!Tensor::new().unwrap().defined().unwrap());
    }

    #[test]
    fn wide_arguments_are_rejected_not_truncated() {
        let t = Tensor::of_data(&[10.0f64, 20.0], &[2]).unwrap();
        assert!(matches!(t.get(1 << 32), Err(Error::Runtime(ref msg)) if msg.contains("index")));
        assert_eq!(t.get(1).unwrap().double_value(&[]).unwrap(), 20.0);
        assert!(matches!(t.to_string(1 << 40), Err(Error::Runtime(_))));
        assert!(matches!(
            Tensor::of_data::<f64>(&[], &[1 << 62, 4]),
            Err(Error::Runtime(ref msg)) if msg.contains("overflows")
        ));
    }

    #[test]
    fn length_is_checked_before_crossing() {
        let err = Tensor::of_data(&[1.0f64], &[2]).unwrap_err();
        assert!(matches!(err, Error::Length { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn reading_with_the_wrong_element_type_fails() {
        let t = Tensor::of_slice(&[1.0f32]).unwrap();
        assert!(t.to_vec::<f64>().is_err());
    }

    #[test]
    fn shallow_clones_share_storage() {
        let a = Tensor::of_slice(&[1.0f64, 2.0]).unwrap();
        let mut b = a.shallow_clone().unwrap();
        b.fill_double(3.0).unwrap();
        drop(b);
        assert_eq!(a.to_vec::<f64>().unwrap(), vec![3.0, 3.0]);
    }
}
