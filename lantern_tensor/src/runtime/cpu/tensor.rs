//! Dense CPU tensors.
//!
//! Storage is shared between a tensor, its shallow clones and the views
//! produced by `select`. Every tensor is contiguous over a window
//! `[offset, offset + numel)` of its storage.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::autograd::{self, Node};
use crate::error::{BridgeError, Result};
use crate::kind::Kind;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Buffer {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl Buffer {
    fn zeros(kind: Kind, len: usize) -> Buffer {
        if kind.is_floating_point() {
            Buffer::Float(vec![0.0; len])
        } else {
            Buffer::Int(vec![0; len])
        }
    }

    fn get_f64(&self, i: usize) -> f64 {
        match self {
            Buffer::Float(v) => v[i],
            Buffer::Int(v) => v[i] as f64,
        }
    }

    fn get_i64(&self, i: usize) -> i64 {
        match self {
            Buffer::Float(v) => v[i] as i64,
            Buffer::Int(v) => v[i],
        }
    }
}

/// Element count of `shape`, rejecting shapes whose product overflows.
pub(crate) fn checked_numel(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .filter(|n| i64::try_from(*n).is_ok())
        .ok_or_else(|| BridgeError::runtime(format!("shape {:?} is too large", shape)))
}

fn check_kind(kind: Kind) -> Result<()> {
    match kind {
        Kind::Half | Kind::ComplexHalf | Kind::ComplexFloat | Kind::ComplexDouble => Err(
            BridgeError::runtime(format!("{:?} tensors are not supported by the cpu runtime", kind)),
        ),
        _ => Ok(()),
    }
}

/// Rounds a value to what `kind` can represent.
fn normalize_f64(kind: Kind, v: f64) -> f64 {
    match kind {
        Kind::Float => v as f32 as f64,
        _ => v,
    }
}

fn normalize_i64(kind: Kind, v: i64) -> i64 {
    match kind {
        Kind::Uint8 => v as u8 as i64,
        Kind::Int8 => v as i8 as i64,
        Kind::Int16 => v as i16 as i64,
        Kind::Int => v as i32 as i64,
        Kind::Bool => (v != 0) as i64,
        _ => v,
    }
}

#[derive(Default)]
pub(crate) struct AutogradMeta {
    pub(crate) requires_grad: bool,
    pub(crate) grad: Option<CpuTensor>,
    pub(crate) grad_fn: Option<Arc<Node>>,
}

pub(crate) struct TensorImpl {
    kind: Kind,
    shape: Vec<usize>,
    offset: usize,
    storage: Arc<RwLock<Buffer>>,
    autograd: Mutex<AutogradMeta>,
}

/// A possibly undefined tensor. Cloning is a shallow clone.
#[derive(Clone, Default)]
pub struct CpuTensor {
    inner: Option<Arc<TensorImpl>>,
}

impl std::fmt::Debug for CpuTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            None => f.write_str("CpuTensor(undefined)"),
            Some(imp) => f
                .debug_struct("CpuTensor")
                .field("kind", &imp.kind)
                .field("shape", &imp.shape)
                .finish(),
        }
    }
}

fn read(storage: &RwLock<Buffer>) -> RwLockReadGuard<'_, Buffer> {
    storage.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(storage: &RwLock<Buffer>) -> RwLockWriteGuard<'_, Buffer> {
    storage.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CpuTensor {
    pub(crate) fn undefined() -> Self {
        Self { inner: None }
    }

    fn from_buffer(kind: Kind, shape: Vec<usize>, buffer: Buffer) -> Self {
        Self {
            inner: Some(Arc::new(TensorImpl {
                kind,
                shape,
                offset: 0,
                storage: Arc::new(RwLock::new(buffer)),
                autograd: Mutex::new(AutogradMeta::default()),
            })),
        }
    }

    pub(crate) fn zeros(shape: &[usize], kind: Kind) -> Result<Self> {
        check_kind(kind)?;
        let numel = checked_numel(shape)?;
        Ok(Self::from_buffer(kind, shape.to_vec(), Buffer::zeros(kind, numel)))
    }

    pub(crate) fn from_f64(kind: Kind, shape: &[usize], values: Vec<f64>) -> Result<Self> {
        check_kind(kind)?;
        let numel = checked_numel(shape)?;
        if numel != values.len() {
            return Err(BridgeError::runtime(format!(
                "shape {:?} is invalid for input of size {}",
                shape,
                values.len()
            )));
        }
        let buffer = if kind.is_floating_point() {
            Buffer::Float(values.into_iter().map(|v| normalize_f64(kind, v)).collect())
        } else {
            Buffer::Int(values.into_iter().map(|v| normalize_i64(kind, v as i64)).collect())
        };
        Ok(Self::from_buffer(kind, shape.to_vec(), buffer))
    }

    pub(crate) fn from_i64(kind: Kind, shape: &[usize], values: Vec<i64>) -> Result<Self> {
        if kind.is_floating_point() {
            return Self::from_f64(kind, shape, values.into_iter().map(|v| v as f64).collect());
        }
        check_kind(kind)?;
        let numel = checked_numel(shape)?;
        if numel != values.len() {
            return Err(BridgeError::runtime(format!(
                "shape {:?} is invalid for input of size {}",
                shape,
                values.len()
            )));
        }
        let buffer = Buffer::Int(values.into_iter().map(|v| normalize_i64(kind, v)).collect());
        Ok(Self::from_buffer(kind, shape.to_vec(), buffer))
    }

    pub(crate) fn scalar_f64(kind: Kind, v: f64) -> Result<Self> {
        Self::from_f64(kind, &[], vec![v])
    }

    /// Decodes native-endian element bytes.
    pub(crate) fn from_bytes(data: &[u8], shape: &[usize], elt_size: usize, kind: Kind) -> Result<Self> {
        check_kind(kind)?;
        if elt_size != kind.elt_size_in_bytes() {
            return Err(BridgeError::runtime(format!(
                "element size {} does not match {:?} ({} bytes)",
                elt_size,
                kind,
                kind.elt_size_in_bytes()
            )));
        }
        let expected = checked_numel(shape)?
            .checked_mul(elt_size)
            .ok_or_else(|| BridgeError::runtime(format!("shape {:?} is too large", shape)))?;
        if data.len() != expected {
            return Err(BridgeError::runtime(format!(
                "expected {} bytes for shape {:?}, got {}",
                expected,
                shape,
                data.len()
            )));
        }
        let chunks = data.chunks_exact(elt_size);
        let buffer = match kind {
            Kind::Float => Buffer::Float(
                chunks
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f64)
                    .collect(),
            ),
            Kind::Double => Buffer::Float(
                chunks
                    .map(|c| f64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            Kind::Uint8 => Buffer::Int(chunks.map(|c| c[0] as i64).collect()),
            Kind::Int8 => Buffer::Int(chunks.map(|c| c[0] as i8 as i64).collect()),
            Kind::Bool => Buffer::Int(chunks.map(|c| (c[0] != 0) as i64).collect()),
            Kind::Int16 => Buffer::Int(chunks.map(|c| i16::from_ne_bytes([c[0], c[1]]) as i64).collect()),
            Kind::Int => Buffer::Int(
                chunks
                    .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as i64)
                    .collect(),
            ),
            Kind::Int64 => Buffer::Int(
                chunks
                    .map(|c| i64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            _ => unreachable!("rejected by check_kind"),
        };
        Ok(Self::from_buffer(kind, shape.to_vec(), buffer))
    }

    /// Encodes the first `numel` elements into `dst` as native-endian bytes.
    pub(crate) fn copy_to_bytes(&self, dst: &mut [u8], numel: usize, elt_size: usize) -> Result<()> {
        let imp = self.imp()?;
        if elt_size != imp.kind.elt_size_in_bytes() {
            return Err(BridgeError::runtime(format!(
                "element size {} does not match {:?} ({} bytes)",
                elt_size,
                imp.kind,
                imp.kind.elt_size_in_bytes()
            )));
        }
        if numel > self.numel()? {
            return Err(BridgeError::runtime(format!(
                "cannot copy {} elements out of a tensor with {}",
                numel,
                self.numel()?
            )));
        }
        if dst.len() < numel * elt_size {
            return Err(BridgeError::protocol("destination buffer is too small"));
        }
        let storage = read(&imp.storage);
        for (i, out) in dst.chunks_exact_mut(elt_size).take(numel).enumerate() {
            let pos = imp.offset + i;
            match imp.kind {
                Kind::Float => out.copy_from_slice(&(storage.get_f64(pos) as f32).to_ne_bytes()),
                Kind::Double => out.copy_from_slice(&storage.get_f64(pos).to_ne_bytes()),
                Kind::Uint8 | Kind::Bool => out[0] = storage.get_i64(pos) as u8,
                Kind::Int8 => out[0] = storage.get_i64(pos) as i8 as u8,
                Kind::Int16 => out.copy_from_slice(&(storage.get_i64(pos) as i16).to_ne_bytes()),
                Kind::Int => out.copy_from_slice(&(storage.get_i64(pos) as i32).to_ne_bytes()),
                Kind::Int64 => out.copy_from_slice(&storage.get_i64(pos).to_ne_bytes()),
                _ => unreachable!("rejected at construction"),
            }
        }
        Ok(())
    }

    pub(crate) fn imp(&self) -> Result<&Arc<TensorImpl>> {
        self.inner
            .as_ref()
            .ok_or_else(|| BridgeError::runtime("undefined tensor"))
    }

    pub(crate) fn defined(&self) -> bool {
        self.inner.is_some()
    }

    /// Identity of the underlying tensor, shared by shallow clones.
    pub(crate) fn key(&self) -> usize {
        self.inner.as_ref().map_or(0, |imp| Arc::as_ptr(imp) as usize)
    }

    pub(crate) fn kind(&self) -> Result<Kind> {
        Ok(self.imp()?.kind)
    }

    pub(crate) fn shape(&self) -> Result<&[usize]> {
        Ok(&self.imp()?.shape)
    }

    pub(crate) fn numel(&self) -> Result<usize> {
        Ok(self.imp()?.shape.iter().product())
    }

    pub(crate) fn values_f64(&self) -> Result<Vec<f64>> {
        let imp = self.imp()?;
        let numel = self.numel()?;
        let storage = read(&imp.storage);
        Ok((imp.offset..imp.offset + numel).map(|i| storage.get_f64(i)).collect())
    }

    pub(crate) fn values_i64(&self) -> Result<Vec<i64>> {
        let imp = self.imp()?;
        let numel = self.numel()?;
        let storage = read(&imp.storage);
        Ok((imp.offset..imp.offset + numel).map(|i| storage.get_i64(i)).collect())
    }

    /// Overwrites every element in place.
    pub(crate) fn write_f64(&self, values: &[f64]) -> Result<()> {
        let imp = self.imp()?;
        let numel = self.numel()?;
        if values.len() != numel {
            return Err(BridgeError::runtime(format!(
                "cannot write {} values into a tensor with {} elements",
                values.len(),
                numel
            )));
        }
        let mut storage = write(&imp.storage);
        match &mut *storage {
            Buffer::Float(buf) => {
                for (i, v) in values.iter().enumerate() {
                    buf[imp.offset + i] = normalize_f64(imp.kind, *v);
                }
            }
            Buffer::Int(buf) => {
                for (i, v) in values.iter().enumerate() {
                    buf[imp.offset + i] = normalize_i64(imp.kind, *v as i64);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_i64(&self, values: &[i64]) -> Result<()> {
        let imp = self.imp()?;
        if imp.kind.is_floating_point() {
            let as_f64: Vec<f64> = values.iter().map(|v| *v as f64).collect();
            return self.write_f64(&as_f64);
        }
        let numel = self.numel()?;
        if values.len() != numel {
            return Err(BridgeError::runtime(format!(
                "cannot write {} values into a tensor with {} elements",
                values.len(),
                numel
            )));
        }
        let mut storage = write(&imp.storage);
        if let Buffer::Int(buf) = &mut *storage {
            for (i, v) in values.iter().enumerate() {
                buf[imp.offset + i] = normalize_i64(imp.kind, *v);
            }
        }
        Ok(())
    }

    /// View of the `index`-th slice along the first dimension. No autograd
    /// bookkeeping happens here; see `ops::select`.
    pub(crate) fn select_view(&self, index: i64) -> Result<CpuTensor> {
        let imp = self.imp()?;
        if imp.shape.is_empty() {
            return Err(BridgeError::runtime("invalid index of a 0-dim tensor"));
        }
        let size = imp.shape[0] as i64;
        let idx = if index < 0 { index + size } else { index };
        if idx < 0 || idx >= size {
            return Err(BridgeError::runtime(format!(
                "index {} is out of bounds for dimension 0 with size {}",
                index, size
            )));
        }
        let inner_shape = imp.shape[1..].to_vec();
        let inner_numel: usize = inner_shape.iter().product();
        Ok(CpuTensor {
            inner: Some(Arc::new(TensorImpl {
                kind: imp.kind,
                shape: inner_shape,
                offset: imp.offset + idx as usize * inner_numel,
                storage: Arc::clone(&imp.storage),
                autograd: Mutex::new(AutogradMeta::default()),
            })),
        })
    }

    /// Copy with fresh storage and no autograd history.
    pub(crate) fn detached_copy(&self) -> Result<CpuTensor> {
        let imp = self.imp()?;
        let buffer = match imp.kind.is_floating_point() {
            true => Buffer::Float(self.values_f64()?),
            false => Buffer::Int(self.values_i64()?),
        };
        Ok(Self::from_buffer(imp.kind, imp.shape.clone(), buffer))
    }

    pub(crate) fn meta(&self) -> Result<MutexGuard<'_, AutogradMeta>> {
        let imp = self.imp()?;
        Ok(imp.autograd.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub(crate) fn requires_grad(&self) -> bool {
        self.meta()
            .map(|m| m.requires_grad || m.grad_fn.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn grad_fn(&self) -> Option<Arc<Node>> {
        self.meta().ok().and_then(|m| m.grad_fn.clone())
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.grad_fn().is_none()
    }

    /// Guards in-place writes: a leaf that requires grad may only be
    /// mutated while recording is off.
    pub(crate) fn check_inplace(&self) -> Result<()> {
        if autograd::is_recording() && self.is_leaf() && self.requires_grad() {
            return Err(BridgeError::runtime(
                "a leaf Variable that requires grad is being used in an in-place operation.",
            ));
        }
        Ok(())
    }

    pub(crate) fn render(&self, line_size: i64) -> Result<String> {
        let imp = match &self.inner {
            Some(imp) => imp,
            None => return Ok("[ Tensor (undefined) ]".to_string()),
        };
        let floating = imp.kind.is_floating_point();
        let cells: Vec<String> = if floating {
            self.values_f64()?
                .iter()
                .map(|v| {
                    if v.fract() == 0.0 && v.abs() < 1e9 {
                        format!("{}", v)
                    } else {
                        format!("{:.4}", v)
                    }
                })
                .collect()
        } else {
            self.values_i64()?.iter().map(|v| v.to_string()).collect()
        };
        let footer = format!(
            "[ CPU{}Type{{{}}} ]",
            imp.kind.type_name(),
            imp.shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        let mut out = String::new();
        match imp.shape.len() {
            0 => {
                let _ = writeln!(out, "{}", cells.first().map(String::as_str).unwrap_or(""));
            }
            1 => {
                for cell in &cells {
                    let _ = writeln!(out, " {}", cell);
                }
            }
            _ => {
                let rows = imp.shape[imp.shape.len() - 2];
                let cols = imp.shape[imp.shape.len() - 1];
                let width = cells.iter().map(String::len).max().unwrap_or(1) + 1;
                let per_line = ((line_size.max(1) as usize) / width).max(1);
                let lead = &imp.shape[..imp.shape.len() - 2];
                let blocks: usize = lead.iter().product();
                for block in 0..blocks {
                    if !lead.is_empty() {
                        let mut rem = block;
                        let mut idx = vec![0usize; lead.len()];
                        for d in (0..lead.len()).rev() {
                            idx[d] = rem % lead[d];
                            rem /= lead[d];
                        }
                        let label: Vec<String> = idx.iter().map(|i| (i + 1).to_string()).collect();
                        let _ = writeln!(out, "({},.,.) =", label.join(","));
                    }
                    let base = block * rows * cols;
                    let mut start = 0;
                    while start < cols.max(1) {
                        let end = (start + per_line).min(cols);
                        if cols > per_line {
                            let _ = writeln!(out, "Columns {} to {}", start + 1, end);
                        }
                        for r in 0..rows {
                            for c in start..end {
                                let _ = write!(out, "{:>width$}", cells[base + r * cols + c], width = width);
                            }
                            out.push('\n');
                        }
                        if cols == 0 {
                            break;
                        }
                        start = end;
                    }
                }
            }
        }
        out.push_str(&footer);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip_preserves_values() {
        let data: Vec<u8> = [1.5f32, -2.0, 3.25, 4.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let t = CpuTensor::from_bytes(&data, &[2, 2], 4, Kind::Float).unwrap();
        assert_eq!(t.shape().unwrap(), &[2, 2]);
        let mut out = vec![0u8; 16];
        t.copy_to_bytes(&mut out, 4, 4).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn element_size_must_match_kind() {
        let err = CpuTensor::from_bytes(&[0u8; 8], &[2], 4, Kind::Double).unwrap_err();
        assert!(err.to_string().contains("element size"));
    }

    #[test]
    fn select_views_share_storage() {
        let t = CpuTensor::from_f64(Kind::Double, &[2, 3], (0..6).map(f64::from).collect()).unwrap();
        let row = t.select_view(-1).unwrap();
        assert_eq!(row.values_f64().unwrap(), vec![3.0, 4.0, 5.0]);
        row.write_f64(&[9.0, 9.0, 9.0]).unwrap();
        assert_eq!(t.values_f64().unwrap(), vec![0.0, 1.0, 2.0, 9.0, 9.0, 9.0]);
        assert!(t.select_view(2).is_err());
    }

    #[test]
    fn narrow_kinds_wrap_like_the_native_type() {
        let t = CpuTensor::from_i64(Kind::Uint8, &[2], vec![256, 257]).unwrap();
        assert_eq!(t.values_i64().unwrap(), vec![0, 1]);
    }

    #[test]
    fn render_includes_type_footer() {
        let t = CpuTensor::from_f64(Kind::Float, &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let text = t.render(80).unwrap();
        assert!(text.ends_with("[ CPUFloatType{2,2} ]"));
        assert!(text.contains('4'));
    }
}
