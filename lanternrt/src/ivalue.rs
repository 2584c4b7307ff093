//! Owned call values for module invocation.

use lantern_tensor::{
    ati_double, ati_free, ati_free_deep, ati_int, ati_tag, ati_tensor, ati_to_double, ati_to_int,
    ati_to_tensor, ati_to_tuple, ati_tuple, ati_tuple_length, Handle, Tag, NULL_HANDLE,
};

use crate::error::{call, Error, Result};
use crate::tensor::Tensor;
use crate::util::c_len;

/// A module argument or result. Tensors inside are owned.
#[derive(Debug)]
pub enum IValue {
    Tensor(Tensor),
    Int(i64),
    Double(f64),
    Tuple(Vec<IValue>),
}

/// A boundary value handle released on drop. `deep` also releases the
/// tensor handles it refers to.
pub(crate) struct RawValue {
    handle: Handle,
    deep: bool,
}

impl RawValue {
    pub(crate) fn shallow(handle: Handle) -> RawValue {
        RawValue { handle, deep: false }
    }

    pub(crate) fn deep(handle: Handle) -> RawValue {
        RawValue { handle, deep: true }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for RawValue {
    fn drop(&mut self) {
        let handle = self.handle;
        let released = if self.deep {
            call(|| ati_free_deep(handle))
        } else {
            call(|| ati_free(handle))
        };
        if let Err(err) = released {
            tracing::warn!(handle, error = %err, "failed to release call value");
        }
    }
}

impl IValue {
    pub fn tag(&self) -> Tag {
        match self {
            IValue::Tensor(_) => Tag::Tensor,
            IValue::Int(_) => Tag::Int,
            IValue::Double(_) => Tag::Double,
            IValue::Tuple(_) => Tag::Tuple,
        }
    }

    fn mismatch(&self, expected: Tag) -> Error {
        Error::TagMismatch {
            expected: expected.name(),
            actual: self.tag().name(),
        }
    }

    pub fn as_tensor(&self) -> Result<&Tensor> {
        match self {
            IValue::Tensor(t) => Ok(t),
            other => Err(other.mismatch(Tag::Tensor)),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            IValue::Int(v) => Ok(*v),
            other => Err(other.mismatch(Tag::Int)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            IValue::Double(v) => Ok(*v),
            other => Err(other.mismatch(Tag::Double)),
        }
    }

    pub fn as_tuple(&self) -> Result<&[IValue]> {
        match self {
            IValue::Tuple(items) => Ok(items),
            other => Err(other.mismatch(Tag::Tuple)),
        }
    }

    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            IValue::Tensor(t) => Ok(t),
            other => Err(other.mismatch(Tag::Tensor)),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<IValue>> {
        match self {
            IValue::Tuple(items) => Ok(items),
            other => Err(other.mismatch(Tag::Tuple)),
        }
    }

    /// Builds the boundary form. Tensor variants refer to the handles
    /// owned by `self`, so the result must be released shallowly.
    pub(crate) fn to_raw(&self) -> Result<RawValue> {
        let handle = match self {
            IValue::Tensor(t) => call(|| ati_tensor(t.handle()))?,
            IValue::Int(v) => call(|| ati_int(*v))?,
            IValue::Double(v) => call(|| ati_double(*v))?,
            IValue::Tuple(items) => {
                let raw = items.iter().map(IValue::to_raw).collect::<Result<Vec<_>>>()?;
                let handles: Vec<Handle> = raw.iter().map(RawValue::handle).collect();
                let n = c_len("tuple elements", handles.len())?;
                call(|| ati_tuple(handles.as_ptr(), n))?
            }
        };
        Ok(RawValue::shallow(handle))
    }

    /// Reads a boundary value. Tensors get fresh handles of their own, so
    /// the source may be released however its owner requires.
    pub(crate) fn from_raw(handle: Handle) -> Result<IValue> {
        let code = call(|| ati_tag(handle))?;
        let tag = Tag::of_c_int(code)
            .ok_or_else(|| Error::Protocol(format!("unknown call value tag {}", code)))?;
        let value = match tag {
            Tag::Tensor => IValue::Tensor(Tensor::from_handle(call(|| ati_to_tensor(handle))?)),
            Tag::Int => IValue::Int(call(|| ati_to_int(handle))?),
            Tag::Double => IValue::Double(call(|| ati_to_double(handle))?),
            Tag::Tuple => {
                let len = call(|| ati_tuple_length(handle))?;
                let mut items = vec![NULL_HANDLE; len.max(0) as usize];
                call(|| ati_to_tuple(handle, items.as_mut_ptr(), len))?;
                let items: Vec<RawValue> = items.into_iter().map(RawValue::shallow).collect();
                IValue::Tuple(
                    items
                        .iter()
                        .map(|item| IValue::from_raw(item.handle()))
                        .collect::<Result<_>>()?,
                )
            }
        };
        Ok(value)
    }
}

impl From<Tensor> for IValue {
    fn from(t: Tensor) -> Self {
        IValue::Tensor(t)
    }
}

impl From<i64> for IValue {
    fn from(v: i64) -> Self {
        IValue::Int(v)
    }
}

impl From<f64> for IValue {
    fn from(v: f64) -> Self {
        IValue::Double(v)
    }
}

impl From<Vec<IValue>> for IValue {
    fn from(items: Vec<IValue>) -> Self {
        IValue::Tuple(items)
    }
}
