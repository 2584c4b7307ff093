//! Reverse-mode differentiation over the recorded graph.
//!
//! Every differentiable op that sees an input requiring grad while recording
//! is on attaches a [`Node`] to its output. The node keeps the op's inputs
//! and a backward closure mapping the output gradient to one gradient per
//! input. Closures are built from the same ops, so a backward pass run with
//! recording enabled yields differentiable gradients.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::ops;
use super::tensor::CpuTensor;
use crate::error::{BridgeError, Result};

pub(crate) type BackwardFn = Box<dyn Fn(&CpuTensor) -> Result<Vec<Option<CpuTensor>>> + Send + Sync>;

const FREED_GRAPH: &str = "Trying to backward through the graph a second time (or directly access \
saved tensors after they have already been freed). Saved intermediate values of the graph are freed \
when you call .backward() or autograd.grad(). Specify retain_graph=True if you need to backward \
through the graph a second time or if you need to access saved tensors after calling backward.";

pub(crate) struct Node {
    name: &'static str,
    inputs: Vec<CpuTensor>,
    backward: Mutex<Option<BackwardFn>>,
}

impl Node {
    fn apply(&self, grad: &CpuTensor, keep_graph: bool) -> Result<Vec<Option<CpuTensor>>> {
        let mut slot = self
            .backward
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if keep_graph {
            match slot.as_ref() {
                Some(f) => f(grad),
                None => Err(BridgeError::runtime(FREED_GRAPH)),
            }
        } else {
            let f = slot.take().ok_or_else(|| BridgeError::runtime(FREED_GRAPH))?;
            drop(slot);
            f(grad)
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Backward", self.name)
    }
}

static GRAD_ENABLED: AtomicBool = AtomicBool::new(true);

thread_local! {
    static ENGINE_MODE: Cell<Option<bool>> = const { Cell::new(None) };
}

/// Whether ops on this thread currently record history.
pub(crate) fn is_recording() -> bool {
    ENGINE_MODE
        .with(|mode| mode.get())
        .unwrap_or_else(|| GRAD_ENABLED.load(Ordering::SeqCst))
}

/// Sets the process-wide flag and returns the previous value.
pub(crate) fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.swap(enabled, Ordering::SeqCst)
}

/// Thread-local override of the grad-mode flag, restored on drop.
pub(crate) struct ModeOverride {
    previous: Option<bool>,
}

impl ModeOverride {
    pub(crate) fn enter(recording: bool) -> Self {
        let previous = ENGINE_MODE.with(|mode| mode.replace(Some(recording)));
        Self { previous }
    }
}

impl Drop for ModeOverride {
    fn drop(&mut self) {
        ENGINE_MODE.with(|mode| mode.set(self.previous));
    }
}

pub(crate) fn without_recording<R>(f: impl FnOnce() -> R) -> R {
    let _mode = ModeOverride::enter(false);
    f()
}

/// Attaches a backward node to `out` when recording is on and some input
/// requires grad.
pub(crate) fn record<F>(out: CpuTensor, name: &'static str, inputs: &[&CpuTensor], backward: F) -> CpuTensor
where
    F: Fn(&CpuTensor) -> Result<Vec<Option<CpuTensor>>> + Send + Sync + 'static,
{
    if !is_recording() || !inputs.iter().any(|t| t.requires_grad()) {
        return out;
    }
    let node = Arc::new(Node {
        name,
        inputs: inputs.iter().map(|t| (*t).clone()).collect(),
        backward: Mutex::new(Some(Box::new(backward))),
    });
    if let Ok(mut meta) = out.meta() {
        meta.requires_grad = true;
        meta.grad_fn = Some(node);
    }
    out
}

fn accumulate(grads: &mut HashMap<usize, CpuTensor>, key: usize, grad: CpuTensor) -> Result<()> {
    let merged = match grads.remove(&key) {
        Some(existing) => ops::add(&existing, &grad)?,
        None => grad,
    };
    grads.insert(key, merged);
    Ok(())
}

/// Non-leaf tensors reachable from `roots`, each listed before the tensors
/// it was computed from. Leaves reached along the way land in `leaves`.
fn topological_order(roots: &[CpuTensor], leaves: &mut HashMap<usize, CpuTensor>) -> Vec<CpuTensor> {
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    let mut stack: Vec<(CpuTensor, bool)> = roots.iter().rev().map(|t| (t.clone(), false)).collect();
    while let Some((tensor, expanded)) = stack.pop() {
        if expanded {
            post_order.push(tensor);
            continue;
        }
        if !visited.insert(tensor.key()) {
            continue;
        }
        match tensor.grad_fn() {
            Some(node) => {
                stack.push((tensor, true));
                for input in node.inputs.iter().rev() {
                    if input.requires_grad() && !visited.contains(&input.key()) {
                        stack.push((input.clone(), false));
                    }
                }
            }
            None => {
                leaves.insert(tensor.key(), tensor);
            }
        }
    }
    post_order.reverse();
    post_order
}

fn accumulate_into_leaf(leaf: &CpuTensor, grad: CpuTensor, create_graph: bool) -> Result<()> {
    let existing = leaf.meta()?.grad.clone();
    let updated = match existing {
        None if create_graph => grad,
        None => grad.detached_copy()?,
        Some(old) if create_graph => ops::add(&old, &grad)?,
        Some(old) => {
            let sum: Vec<f64> = old
                .values_f64()?
                .iter()
                .zip(grad.values_f64()?)
                .map(|(a, b)| a + b)
                .collect();
            old.write_f64(&sum)?;
            old
        }
    };
    leaf.meta()?.grad = Some(updated);
    Ok(())
}

/// Runs a backward pass seeded with ones at every root.
///
/// With no `inputs`, gradients accumulate into the `grad` of every leaf
/// reached and an empty vector is returned. Otherwise the gradient of each
/// input is returned in order and no leaf is touched.
pub(crate) fn run_backward(
    roots: &[CpuTensor],
    inputs: &[CpuTensor],
    keep_graph: bool,
    create_graph: bool,
) -> Result<Vec<CpuTensor>> {
    let _mode = ModeOverride::enter(create_graph);
    for (i, root) in roots.iter().enumerate() {
        root.imp()?;
        if !root.requires_grad() {
            return Err(BridgeError::runtime(format!(
                "element {} of tensors does not require grad and does not have a grad_fn",
                i
            )));
        }
    }
    for input in inputs {
        input.imp()?;
        if !input.requires_grad() {
            return Err(BridgeError::runtime(
                "One of the differentiated Tensors does not require grad",
            ));
        }
    }

    let mut grads = HashMap::new();
    for root in roots {
        accumulate(&mut grads, root.key(), ops::ones_like(root)?)?;
    }
    let mut wanted: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, input) in inputs.iter().enumerate() {
        wanted.entry(input.key()).or_default().push(i);
    }
    let mut captured: Vec<Option<CpuTensor>> = vec![None; inputs.len()];

    let mut leaves = HashMap::new();
    let order = topological_order(roots, &mut leaves);
    tracing::trace!(nodes = order.len(), leaves = leaves.len(), "backward pass");
    for tensor in &order {
        let key = tensor.key();
        let grad = match grads.remove(&key) {
            Some(grad) => grad,
            None => continue,
        };
        for &idx in wanted.get(&key).into_iter().flatten() {
            captured[idx] = Some(grad.clone());
        }
        let node = match tensor.grad_fn() {
            Some(node) => node,
            None => continue,
        };
        let input_grads = node.apply(&grad, keep_graph)?;
        for (input, input_grad) in node.inputs.iter().zip(input_grads) {
            if let Some(input_grad) = input_grad {
                if input.requires_grad() {
                    accumulate(&mut grads, input.key(), input_grad)?;
                }
            }
        }
    }

    if inputs.is_empty() {
        for (key, leaf) in &leaves {
            if let Some(grad) = grads.remove(key) {
                accumulate_into_leaf(leaf, grad, create_graph)?;
            }
        }
        return Ok(Vec::new());
    }

    inputs
        .iter()
        .enumerate()
        .map(|(i, input)| match captured[i].take() {
            Some(grad) => Ok(grad),
            None => grads.get(&input.key()).cloned().ok_or_else(|| {
                BridgeError::runtime(
                    "One of the differentiated Tensors appears to not have been used in the graph.",
                )
            }),
        })
        .collect()
}
