//! Handle registries.
//!
//! Every object crossing the boundary is parked in a registry and addressed
//! by a non-zero id. Ids come from one process-wide counter so a handle of
//! one kind never aliases another kind. Ids are never reused, so any id
//! below the counter that is not live was freed or belongs to another
//! registry. Use-after-free and double-free become protocol errors without
//! remembering every freed id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{BridgeError, Result};

pub type Handle = i64;

/// The null handle.
pub const NULL_HANDLE: Handle = 0;

static NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);

fn next_handle() -> Handle {
    NEXT_HANDLE.fetch_add(1, Ordering::SeqCst)
}

fn was_issued(handle: Handle) -> bool {
    handle > NULL_HANDLE && handle < NEXT_HANDLE.load(Ordering::SeqCst)
}

fn lock<'a, T>(what: &str, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(registry = what, "registry mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) struct Registry<T> {
    kind: &'static str,
    live: Mutex<HashMap<Handle, T>>,
}

impl<T> Registry<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, value: T) -> Handle {
        let id = next_handle();
        lock(self.kind, &self.live).insert(id, value);
        tracing::debug!(kind = self.kind, handle = id, "registered");
        id
    }

    fn missing(&self, handle: Handle) -> BridgeError {
        if handle == NULL_HANDLE {
            BridgeError::protocol(format!("null {} handle", self.kind))
        } else if was_issued(handle) {
            BridgeError::protocol(format!(
                "stale {} handle {} (already freed or not a {} handle)",
                self.kind, handle, self.kind
            ))
        } else {
            BridgeError::protocol(format!("invalid {} handle {}", self.kind, handle))
        }
    }

    /// Runs `f` on the registered value. The lock is held only for the
    /// duration of `f`, which must not call back into the registry.
    pub(crate) fn with<R>(&self, handle: Handle, f: impl FnOnce(&T) -> R) -> Result<R> {
        let guard = lock(self.kind, &self.live);
        match guard.get(&handle) {
            Some(value) => Ok(f(value)),
            None => Err(self.missing(handle)),
        }
    }

    pub(crate) fn remove(&self, handle: Handle) -> Result<T> {
        let removed = lock(self.kind, &self.live).remove(&handle);
        match removed {
            Some(value) => {
                tracing::debug!(kind = self.kind, handle, "released");
                Ok(value)
            }
            None => Err(self.missing(handle)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(self.kind, &self.live).len()
    }
}

impl<T: Clone> Registry<T> {
    pub(crate) fn get(&self, handle: Handle) -> Result<T> {
        self.with(handle, T::clone)
    }
}
