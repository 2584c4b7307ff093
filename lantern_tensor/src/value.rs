//! Call values: the dynamically typed arguments and results of compiled
//! module invocations.

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Tensor,
    Int,
    Double,
    Tuple,
}

impl Tag {
    pub fn c_int(self) -> i32 {
        match self {
            Tag::Tensor => 0,
            Tag::Int => 1,
            Tag::Double => 2,
            Tag::Tuple => 3,
        }
    }

    pub fn of_c_int(v: i32) -> Option<Tag> {
        match v {
            0 => Some(Tag::Tensor),
            1 => Some(Tag::Int),
            2 => Some(Tag::Double),
            3 => Some(Tag::Tuple),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Tensor => "Tensor",
            Tag::Int => "Int",
            Tag::Double => "Double",
            Tag::Tuple => "Tuple",
        }
    }
}

/// A call value generic over its tensor payload. The boundary stores
/// `CallValue<Handle>`; runtimes evaluate over `CallValue<R::Tensor>`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallValue<T> {
    Tensor(T),
    Int(i64),
    Double(f64),
    Tuple(Vec<CallValue<T>>),
}

impl<T> CallValue<T> {
    pub fn tag(&self) -> Tag {
        match self {
            CallValue::Tensor(_) => Tag::Tensor,
            CallValue::Int(_) => Tag::Int,
            CallValue::Double(_) => Tag::Double,
            CallValue::Tuple(_) => Tag::Tuple,
        }
    }

    fn mismatch(&self, expected: Tag) -> BridgeError {
        BridgeError::TagMismatch {
            expected: expected.name(),
            actual: self.tag().name(),
        }
    }

    pub fn as_tensor(&self) -> Result<&T> {
        match self {
            CallValue::Tensor(t) => Ok(t),
            other => Err(other.mismatch(Tag::Tensor)),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            CallValue::Int(v) => Ok(*v),
            other => Err(other.mismatch(Tag::Int)),
        }
    }

    pub fn as_double(&self) -> Result<f64> {
        match self {
            CallValue::Double(v) => Ok(*v),
            other => Err(other.mismatch(Tag::Double)),
        }
    }

    pub fn as_tuple(&self) -> Result<&[CallValue<T>]> {
        match self {
            CallValue::Tuple(items) => Ok(items),
            other => Err(other.mismatch(Tag::Tuple)),
        }
    }

    /// Rebuilds the value with every tensor payload converted by `f`,
    /// stopping at the first failure.
    pub fn try_map<U, F>(&self, f: &mut F) -> Result<CallValue<U>>
    where
        F: FnMut(&T) -> Result<U>,
    {
        Ok(match self {
            CallValue::Tensor(t) => CallValue::Tensor(f(t)?),
            CallValue::Int(v) => CallValue::Int(*v),
            CallValue::Double(v) => CallValue::Double(*v),
            CallValue::Tuple(items) => CallValue::Tuple(
                items
                    .iter()
                    .map(|item| item.try_map(f))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    /// Every tensor payload, depth first.
    pub fn tensors(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_tensors(&mut out);
        out
    }

    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            CallValue::Tensor(t) => out.push(t),
            CallValue::Int(_) | CallValue::Double(_) => {}
            CallValue::Tuple(items) => {
                for item in items {
                    item.collect_tensors(out);
                }
            }
        }
    }
}
