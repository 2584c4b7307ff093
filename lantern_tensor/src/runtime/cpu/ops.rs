//! Differentiable tensor ops.

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::autograd::record;
use super::tensor::{checked_numel, CpuTensor};
use crate::error::{BridgeError, Result};
use crate::kind::Kind;

static RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

pub(crate) fn manual_seed(seed: i64) {
    let mut rng = RNG.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *rng = StdRng::seed_from_u64(seed as u64);
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(BridgeError::runtime(format!(
                    "The size of tensor a ({}) must match the size of tensor b ({}) at non-singleton dimension {}",
                    da, db, i
                )))
            }
        };
    }
    Ok(out)
}

/// For every element of `out_shape`, the position of its source element in
/// a contiguous tensor of `in_shape` broadcast to `out_shape`.
fn source_positions(in_shape: &[usize], out_shape: &[usize]) -> Result<Vec<usize>> {
    if in_shape.len() > out_shape.len() {
        return Err(BridgeError::runtime(format!(
            "cannot broadcast {:?} to {:?}",
            in_shape, out_shape
        )));
    }
    let pad = out_shape.len() - in_shape.len();
    let mut in_strides = vec![0usize; out_shape.len()];
    let mut stride = 1;
    for d in (0..in_shape.len()).rev() {
        let out_d = d + pad;
        if in_shape[d] == out_shape[out_d] {
            in_strides[out_d] = stride;
        } else if in_shape[d] != 1 {
            return Err(BridgeError::runtime(format!(
                "cannot broadcast {:?} to {:?}",
                in_shape, out_shape
            )));
        }
        stride *= in_shape[d];
    }
    let numel = checked_numel(out_shape)?;
    let mut positions = Vec::with_capacity(numel);
    for linear in 0..numel {
        let mut rem = linear;
        let mut pos = 0;
        for d in (0..out_shape.len()).rev() {
            pos += (rem % out_shape[d]) * in_strides[d];
            rem /= out_shape[d];
        }
        positions.push(pos);
    }
    Ok(positions)
}

fn binary(a: &CpuTensor, b: &CpuTensor, f: impl Fn(f64, f64) -> f64) -> Result<CpuTensor> {
    let shape = broadcast_shape(a.shape()?, b.shape()?)?;
    let pa = source_positions(a.shape()?, &shape)?;
    let pb = source_positions(b.shape()?, &shape)?;
    let va = a.values_f64()?;
    let vb = b.values_f64()?;
    let values = pa.iter().zip(&pb).map(|(i, j)| f(va[*i], vb[*j])).collect();
    CpuTensor::from_f64(a.kind()?.promote(b.kind()?), &shape, values)
}

pub(crate) fn add(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    let out = binary(a, b, |x, y| x + y)?;
    let (sa, sb) = (a.shape()?.to_vec(), b.shape()?.to_vec());
    Ok(record(out, "Add", &[a, b], move |g| {
        Ok(vec![Some(sum_to(g, &sa)?), Some(sum_to(g, &sb)?)])
    }))
}

pub(crate) fn sub(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    let out = binary(a, b, |x, y| x - y)?;
    let (sa, sb) = (a.shape()?.to_vec(), b.shape()?.to_vec());
    Ok(record(out, "Sub", &[a, b], move |g| {
        Ok(vec![Some(sum_to(g, &sa)?), Some(sum_to(&neg(g)?, &sb)?)])
    }))
}

pub(crate) fn mul(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    let out = binary(a, b, |x, y| x * y)?;
    let (sa, sb) = (a.shape()?.to_vec(), b.shape()?.to_vec());
    let (saved_a, saved_b) = (a.clone(), b.clone());
    Ok(record(out, "Mul", &[a, b], move |g| {
        Ok(vec![
            Some(sum_to(&mul(g, &saved_b)?, &sa)?),
            Some(sum_to(&mul(g, &saved_a)?, &sb)?),
        ])
    }))
}

/// Integer tensors stay integral unless the factor has a fractional part.
pub(crate) fn mul_scalar(t: &CpuTensor, s: f64) -> Result<CpuTensor> {
    let kind = t.kind()?;
    let out_kind = if !kind.is_floating_point() && s.fract() != 0.0 {
        Kind::Float
    } else {
        kind
    };
    let values = t.values_f64()?.into_iter().map(|v| v * s).collect();
    let out = CpuTensor::from_f64(out_kind, t.shape()?, values)?;
    Ok(record(out, "MulScalar", &[t], move |g| Ok(vec![Some(mul_scalar(g, s)?)])))
}

pub(crate) fn neg(t: &CpuTensor) -> Result<CpuTensor> {
    let values = t.values_f64()?.into_iter().map(|v| -v).collect();
    let out = CpuTensor::from_f64(t.kind()?, t.shape()?, values)?;
    Ok(record(out, "Neg", &[t], |g| Ok(vec![Some(neg(g)?)])))
}

/// Sum of every element as a 0-dim tensor.
pub(crate) fn sum(t: &CpuTensor) -> Result<CpuTensor> {
    let kind = t.kind()?;
    let out = if kind.is_floating_point() {
        CpuTensor::scalar_f64(kind, t.values_f64()?.iter().sum())?
    } else {
        CpuTensor::from_i64(Kind::Int64, &[], vec![t.values_i64()?.iter().sum()])?
    };
    let shape = t.shape()?.to_vec();
    Ok(record(out, "Sum", &[t], move |g| Ok(vec![Some(expand(g, &shape)?)])))
}

pub(crate) fn mean(t: &CpuTensor) -> Result<CpuTensor> {
    let kind = t.kind()?;
    if !kind.is_floating_point() {
        return Err(BridgeError::runtime(format!(
            "mean(): could not infer output dtype. Input dtype must be either a floating point or complex dtype. Got: {}",
            kind.type_name()
        )));
    }
    let n = t.numel()?;
    mul_scalar(&sum(t)?, 1.0 / n as f64)
}

/// Broadcasts `t` to `shape`.
pub(crate) fn expand(t: &CpuTensor, shape: &[usize]) -> Result<CpuTensor> {
    let in_shape = t.shape()?.to_vec();
    if in_shape == shape {
        return Ok(t.clone());
    }
    let positions = source_positions(&in_shape, shape)?;
    let values = t.values_f64()?;
    let out = CpuTensor::from_f64(t.kind()?, shape, positions.iter().map(|p| values[*p]).collect())?;
    Ok(record(out, "Expand", &[t], move |g| Ok(vec![Some(sum_to(g, &in_shape)?)])))
}

/// Reduces a broadcast gradient back to `shape`.
pub(crate) fn sum_to(t: &CpuTensor, shape: &[usize]) -> Result<CpuTensor> {
    let from_shape = t.shape()?.to_vec();
    if from_shape == shape {
        return Ok(t.clone());
    }
    let positions = source_positions(shape, &from_shape)?;
    let mut values = vec![0.0; shape.iter().product()];
    for (v, p) in t.values_f64()?.into_iter().zip(positions) {
        values[p] += v;
    }
    let out = CpuTensor::from_f64(t.kind()?, shape, values)?;
    Ok(record(out, "SumTo", &[t], move |g| Ok(vec![Some(expand(g, &from_shape)?)])))
}

fn matrix_dims(t: &CpuTensor) -> Result<(usize, usize)> {
    match t.shape()? {
        [r, c] => Ok((*r, *c)),
        other => Err(BridgeError::runtime(format!(
            "matmul: expected 2-D tensors, got a tensor of shape {:?}",
            other
        ))),
    }
}

pub(crate) fn transpose(t: &CpuTensor) -> Result<CpuTensor> {
    let (rows, cols) = matrix_dims(t)?;
    let values = t.values_f64()?;
    let mut out = vec![0.0; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = values[r * cols + c];
        }
    }
    let out = CpuTensor::from_f64(t.kind()?, &[cols, rows], out)?;
    Ok(record(out, "Transpose", &[t], |g| Ok(vec![Some(transpose(g)?)])))
}

pub(crate) fn matmul(a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    let (n, k) = matrix_dims(a)?;
    let (k2, m) = matrix_dims(b)?;
    if k != k2 {
        return Err(BridgeError::runtime(format!(
            "mat1 and mat2 shapes cannot be multiplied ({}x{} and {}x{})",
            n, k, k2, m
        )));
    }
    let va = a.values_f64()?;
    let vb = b.values_f64()?;
    let mut out = vec![0.0; n * m];
    for i in 0..n {
        for p in 0..k {
            let x = va[i * k + p];
            for j in 0..m {
                out[i * m + j] += x * vb[p * m + j];
            }
        }
    }
    let out = CpuTensor::from_f64(a.kind()?.promote(b.kind()?), &[n, m], out)?;
    let (saved_a, saved_b) = (a.clone(), b.clone());
    Ok(record(out, "Mm", &[a, b], move |g| {
        Ok(vec![
            Some(matmul(g, &transpose(&saved_b)?)?),
            Some(matmul(&transpose(&saved_a)?, g)?),
        ])
    }))
}

/// Sub-tensor along the first dimension, sharing storage with `t`.
pub(crate) fn select(t: &CpuTensor, index: i64) -> Result<CpuTensor> {
    let out = t.select_view(index)?;
    let shape = t.shape()?.to_vec();
    let idx = (if index < 0 { index + shape[0] as i64 } else { index }) as usize;
    Ok(record(out, "Select", &[t], move |g| {
        Ok(vec![Some(select_backward(g, &shape, idx)?)])
    }))
}

fn select_backward(g: &CpuTensor, shape: &[usize], index: usize) -> Result<CpuTensor> {
    let block: usize = shape[1..].iter().product();
    let mut values = vec![0.0; shape.iter().product()];
    values[index * block..(index + 1) * block].copy_from_slice(&g.values_f64()?);
    let out = CpuTensor::from_f64(g.kind()?, shape, values)?;
    Ok(record(out, "SelectBackward", &[g], move |gg| {
        Ok(vec![Some(select(gg, index as i64)?)])
    }))
}

pub(crate) fn zeros(shape: &[usize], kind: Kind) -> Result<CpuTensor> {
    CpuTensor::zeros(shape, kind)
}

pub(crate) fn ones_like(t: &CpuTensor) -> Result<CpuTensor> {
    CpuTensor::from_f64(t.kind()?, t.shape()?, vec![1.0; t.numel()?])
}

/// Uniform samples in `[0, 1)`.
pub(crate) fn rand(shape: &[usize], kind: Kind) -> Result<CpuTensor> {
    if !kind.is_floating_point() {
        return Err(BridgeError::runtime(format!(
            "\"check_uniform_bounds\" not implemented for '{}'",
            kind.type_name()
        )));
    }
    let numel = checked_numel(shape)?;
    let mut rng = RNG.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let values = (0..numel).map(|_| rng.gen::<f64>()).collect();
    CpuTensor::from_f64(kind, shape, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], values: &[f64]) -> CpuTensor {
        CpuTensor::from_f64(Kind::Double, shape, values.to_vec()).unwrap()
    }

    #[test]
    fn add_broadcasts_rows() {
        let a = t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = t(&[2], &[10.0, 20.0]);
        let c = add(&a, &b).unwrap();
        assert_eq!(c.values_f64().unwrap(), vec![11.0, 22.0, 13.0, 24.0]);
        assert!(add(&a, &t(&[3], &[0.0; 3])).is_err());
    }

    #[test]
    fn sum_to_reverses_broadcast() {
        let g = t(&[2, 2], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(sum_to(&g, &[2]).unwrap().values_f64().unwrap(), vec![2.0, 2.0]);
        assert_eq!(sum_to(&g, &[]).unwrap().values_f64().unwrap(), vec![4.0]);
    }

    #[test]
    fn matmul_of_small_matrices() {
        let a = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = t(&[3, 1], &[1.0, 0.0, -1.0]);
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape().unwrap(), &[2, 1]);
        assert_eq!(c.values_f64().unwrap(), vec![-2.0, -2.0]);
        assert!(matmul(&b, &b).is_err());
    }

    #[test]
    fn mean_rejects_integers() {
        let ints = CpuTensor::from_i64(Kind::Int64, &[2], vec![1, 2]).unwrap();
        assert!(mean(&ints).is_err());
        assert_eq!(mean(&t(&[2], &[1.0, 2.0])).unwrap().values_f64().unwrap(), vec![1.5]);
    }

    #[test]
    fn seeded_rand_is_reproducible() {
        manual_seed(7);
        let a = rand(&[4], Kind::Double).unwrap().values_f64().unwrap();
        manual_seed(7);
        let b = rand(&[4], Kind::Double).unwrap().values_f64().unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }
}
