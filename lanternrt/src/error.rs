use std::ffi::NulError;

use lantern_tensor::{take_last_error, BridgeError};

pub type Result<T> = std::result::Result<T, Error>;

/// Failures returned by the safe API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The runtime rejected the call.
    #[error("{0}")]
    Runtime(String),

    /// A call value held a different variant than requested.
    #[error("expected {expected} value, got {actual}")]
    TagMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The boundary saw a broken calling contract. Ownership types rule this
    /// out for handles created through this crate.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("path or name contains a NUL byte: {0}")]
    Nul(#[from] NulError),

    #[error("{what}: expected {expected} elements, got {actual}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl From<BridgeError> for Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Runtime(msg) => Error::Runtime(msg),
            BridgeError::TagMismatch { expected, actual } => Error::TagMismatch { expected, actual },
            BridgeError::Protocol(msg) => Error::Protocol(msg),
        }
    }
}

/// Runs one boundary call and turns a channel entry into `Err`.
///
/// The channel is drained first so an unread failure from an earlier raw
/// call is never attributed to this one.
pub(crate) fn call<T>(f: impl FnOnce() -> T) -> Result<T> {
    if let Some(stale) = take_last_error() {
        tracing::warn!(error = %stale, "discarding unread boundary error");
    }
    let out = f();
    match take_last_error() {
        Some(err) => Err(err.into()),
        None => Ok(out),
    }
}
