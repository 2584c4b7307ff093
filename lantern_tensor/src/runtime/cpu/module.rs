//! Interpreted modules.
//!
//! A module file is a JSON document naming its arity and a body expression
//! over the positional inputs:
//!
//! ```json
//! {"name": "affine", "inputs": 2, "body": {"add": [{"matmul": [{"input": 0}, {"input": 1}]}, {"double": 1.0}]}}
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::ops;
use super::tensor::CpuTensor;
use crate::error::{BridgeError, Result};
use crate::value::CallValue;

type Value = CallValue<CpuTensor>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Expr {
    Input(usize),
    Int(i64),
    Double(f64),
    Tuple(Vec<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Matmul(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sum(Box<Expr>),
    Mean(Box<Expr>),
    Numel(Box<Expr>),
    Get(Box<Expr>, usize),
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Deserialize)]
pub struct CpuModule {
    name: String,
    inputs: usize,
    body: Expr,
}

impl CpuModule {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| BridgeError::runtime(format!("failed to read {}: {}", path.display(), err)))?;
        let module: CpuModule = serde_json::from_str(&text)?;
        tracing::info!(name = %module.name, inputs = module.inputs, path = %path.display(), "loaded module");
        Ok(module)
    }

    pub(crate) fn forward(&self, args: &[Value]) -> Result<Value> {
        if args.len() != self.inputs {
            return Err(BridgeError::runtime(format!(
                "forward() of {} expected {} argument(s), got {}",
                self.name,
                self.inputs,
                args.len()
            )));
        }
        eval(&self.body, args)
    }
}

fn eval(expr: &Expr, args: &[Value]) -> Result<Value> {
    match expr {
        Expr::Input(i) => args
            .get(*i)
            .cloned()
            .ok_or_else(|| BridgeError::runtime(format!("input {} is out of range", i))),
        Expr::Int(v) => Ok(CallValue::Int(*v)),
        Expr::Double(v) => Ok(CallValue::Double(*v)),
        Expr::Tuple(items) => Ok(CallValue::Tuple(
            items.iter().map(|e| eval(e, args)).collect::<Result<_>>()?,
        )),
        Expr::Add(a, b) => arith(Arith::Add, eval(a, args)?, eval(b, args)?),
        Expr::Sub(a, b) => arith(Arith::Sub, eval(a, args)?, eval(b, args)?),
        Expr::Mul(a, b) => arith(Arith::Mul, eval(a, args)?, eval(b, args)?),
        Expr::Matmul(a, b) => {
            let (a, b) = (eval(a, args)?, eval(b, args)?);
            Ok(CallValue::Tensor(ops::matmul(a.as_tensor()?, b.as_tensor()?)?))
        }
        Expr::Neg(e) => match eval(e, args)? {
            CallValue::Int(v) => Ok(CallValue::Int(-v)),
            CallValue::Double(v) => Ok(CallValue::Double(-v)),
            other => Ok(CallValue::Tensor(ops::neg(other.as_tensor()?)?)),
        },
        Expr::Sum(e) => Ok(CallValue::Tensor(ops::sum(eval(e, args)?.as_tensor()?)?)),
        Expr::Mean(e) => Ok(CallValue::Tensor(ops::mean(eval(e, args)?.as_tensor()?)?)),
        Expr::Numel(e) => Ok(CallValue::Int(eval(e, args)?.as_tensor()?.numel()? as i64)),
        Expr::Get(e, k) => {
            let value = eval(e, args)?;
            let items = value.as_tuple()?;
            items.get(*k).cloned().ok_or_else(|| {
                BridgeError::runtime(format!(
                    "tuple index {} is out of range for a tuple of length {}",
                    k,
                    items.len()
                ))
            })
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        CallValue::Int(v) => Some(*v as f64),
        CallValue::Double(v) => Some(*v),
        _ => None,
    }
}

fn tensor_op(op: Arith, a: &CpuTensor, b: &CpuTensor) -> Result<CpuTensor> {
    match op {
        Arith::Add => ops::add(a, b),
        Arith::Sub => ops::sub(a, b),
        Arith::Mul => ops::mul(a, b),
    }
}

fn arith(op: Arith, a: Value, b: Value) -> Result<Value> {
    match (&a, &b) {
        (CallValue::Int(x), CallValue::Int(y)) => Ok(CallValue::Int(match op {
            Arith::Add => x.wrapping_add(*y),
            Arith::Sub => x.wrapping_sub(*y),
            Arith::Mul => x.wrapping_mul(*y),
        })),
        (CallValue::Tensor(x), CallValue::Tensor(y)) => Ok(CallValue::Tensor(tensor_op(op, x, y)?)),
        (CallValue::Tensor(t), other) | (other, CallValue::Tensor(t)) if number(other).is_some() => {
            let n = number(other).unwrap_or_default();
            let tensor_first = matches!(a, CallValue::Tensor(_));
            let out = match op {
                Arith::Mul => ops::mul_scalar(t, n)?,
                Arith::Add => ops::add(t, &CpuTensor::scalar_f64(t.kind()?, n)?)?,
                Arith::Sub if tensor_first => ops::sub(t, &CpuTensor::scalar_f64(t.kind()?, n)?)?,
                Arith::Sub => ops::sub(&CpuTensor::scalar_f64(t.kind()?, n)?, t)?,
            };
            Ok(CallValue::Tensor(out))
        }
        _ => match (number(&a), number(&b)) {
            (Some(x), Some(y)) => Ok(CallValue::Double(match op {
                Arith::Add => x + y,
                Arith::Sub => x - y,
                Arith::Mul => x * y,
            })),
            _ => {
                let offending = if number(&a).is_none() && !matches!(a, CallValue::Tensor(_)) {
                    &a
                } else {
                    &b
                };
                Err(BridgeError::TagMismatch {
                    expected: "Tensor",
                    actual: offending.tag().name(),
                })
            }
        },
    }
}
