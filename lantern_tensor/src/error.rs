use std::fmt;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure kinds surfaced through the error channel.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Any failure raised by the runtime itself: shape, device or kind
    /// mismatch, allocation failure, freed autograd graph, I/O.
    #[error("{0}")]
    Runtime(String),

    /// A call value was asked for a variant it does not hold.
    #[error("expected {expected} value, got {actual}")]
    TagMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// The caller broke the calling contract: null, stale or double-freed
    /// handle, wrong placeholder contents, buffer length mismatch.
    #[error("{0}")]
    Protocol(String),
}

impl BridgeError {
    pub fn runtime(msg: impl fmt::Display) -> Self {
        BridgeError::Runtime(msg.to_string())
    }

    pub fn protocol(msg: impl fmt::Display) -> Self {
        BridgeError::Protocol(msg.to_string())
    }

    /// Numeric code reported by `at_last_err_kind`.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::Runtime(_) => 1,
            BridgeError::TagMismatch { .. } => 2,
            BridgeError::Protocol(_) => 3,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Runtime(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Runtime(err.to_string())
    }
}

#[cfg(feature = "torch")]
impl From<tch::TchError> for BridgeError {
    fn from(err: tch::TchError) -> Self {
        BridgeError::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_mismatch_message_names_both_variants() {
        let err = BridgeError::TagMismatch {
            expected: "Int",
            actual: "Tuple",
        };
        assert_eq!(err.to_string(), "expected Int value, got Tuple");
        assert_eq!(err.code(), 2);
    }
}
