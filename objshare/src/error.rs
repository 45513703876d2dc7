//! Error types for shared-object access and command application

use std::time::Duration;
use thiserror::Error;

/// Errors raised synchronously to a caller of the coordinator or a proxy
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Method '{method}' is blocked: {message}")]
    Blocked { method: String, message: String },

    #[error("Shared object not found: {0}")]
    NotFound(String),

    #[error("Object '{object}' has no attribute '{attr}'")]
    AttributeNotFound { object: String, attr: String },

    #[error("Attribute '{0}' is not callable")]
    NotCallable(String),

    #[error("'{0}' is a method, not a value")]
    NotAValue(String),

    #[error("Invalid attribute name: {0:?}")]
    InvalidName(String),

    #[error("Invalid read-modify-write: {0}")]
    InvalidRmw(String),

    #[error("Shared object '{0}' was re-registered while a command was being applied")]
    Superseded(String),

    #[error("Timed out after {timeout:?} waiting for writes to {keys:?}")]
    WaitTimeout { keys: Vec<String>, timeout: Duration },

    #[error("Command queue full, enqueue timed out after {timeout:?}")]
    QueueFull { timeout: Duration },

    #[error("Command queue closed")]
    QueueClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Call(#[from] CallError),
}

impl ShareError {
    /// Check if this error came from a read barrier expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShareError::WaitTimeout { .. })
    }

    /// Check if this error is a misuse of the proxy protocol
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            ShareError::Blocked { .. }
                | ShareError::NotFound(_)
                | ShareError::AttributeNotFound { .. }
                | ShareError::NotCallable(_)
                | ShareError::NotAValue(_)
                | ShareError::InvalidName(_)
                | ShareError::InvalidRmw(_)
        )
    }
}

/// Errors produced by a wrapped object while executing a method
///
/// Inside the coordinator these are logged and published as apply failures;
/// they never reach the worker that queued the command.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Type mismatch: cannot {op} {left} and {right}")]
    TypeMismatch { op: String, left: String, right: String },

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Arithmetic overflow in {0}")]
    Overflow(String),

    #[error("{0}")]
    Failed(String),

    #[error("Method '{method}' panicked: {message}")]
    Panicked { method: String, message: String },
}

/// Result alias for shared-object operations
pub type Result<T> = std::result::Result<T, ShareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_timeout_message() {
        let err = ShareError::WaitTimeout {
            keys: vec!["counter.count".to_string()],
            timeout: Duration::from_millis(250),
        };

        let msg = err.to_string();
        assert!(msg.contains("counter.count"));
        assert!(msg.contains("250ms"));
        assert!(err.is_timeout());
        assert!(!err.is_protocol_misuse());
    }

    #[test]
    fn test_blocked_is_protocol_misuse() {
        let err = ShareError::Blocked {
            method: "wait".to_string(),
            message: "use poll instead".to_string(),
        };

        assert!(err.is_protocol_misuse());
        assert!(err.to_string().contains("use poll instead"));
    }

    #[test]
    fn test_call_error_is_transparent() {
        let err: ShareError = CallError::UnknownMethod("frobnicate".to_string()).into();
        assert_eq!(err.to_string(), "Unknown method: frobnicate");
    }
}
