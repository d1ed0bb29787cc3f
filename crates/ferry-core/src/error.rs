//! Error types for transfer operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::OperationKind;

/// Errors raised while validating or executing a transfer.
///
/// Cancellation travels through the same channel as failures but is a control
/// signal, not an error: check [`TransferError::is_cancellation`] before
/// treating a value as a failure.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    /// An I/O error that may succeed if attempted again.
    #[error("I/O error at {path}: {message}")]
    TransientIo { path: PathBuf, message: String },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// The operation type cannot be executed with the given locations or collaborators.
    #[error("Unsupported {kind} operation: {reason}")]
    UnsupportedOperationType {
        kind: OperationKind,
        reason: String,
    },

    /// Source and target locations cannot be combined (e.g. two different cloud accounts).
    #[error("Location mismatch: {message}")]
    LocationMismatch { message: String },

    /// A sync or cloud collaborator could not agree on the transfer protocol.
    #[error("Protocol negotiation failed: {message}")]
    ProtocolNegotiation { message: String },

    /// A location string could not be parsed.
    #[error("Invalid location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    /// The request is missing something its operation type requires.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The operation's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,
}

impl TransferError {
    /// Create an error from an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::TransientIo {
                path,
                message: source.to_string(),
            },
        }
    }

    /// Create a transient error that is not tied to a filesystem path.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo {
            path: PathBuf::new(),
            message: message.into(),
        }
    }

    pub fn unsupported(kind: OperationKind, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperationType {
            kind,
            reason: reason.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether this value is the cancellation signal rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether an automatic retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::ProtocolNegotiation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_io() {
        let err = TransferError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, TransferError::PermissionDenied { .. }));
        assert!(!err.is_retryable());

        let err = TransferError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk"),
        );
        assert!(matches!(err, TransferError::TransientIo { .. }));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow disk"));
    }

    #[test]
    fn test_cancellation_is_not_a_failure_kind() {
        assert!(TransferError::Cancelled.is_cancellation());
        assert!(!TransferError::Cancelled.is_retryable());
        assert!(!TransferError::transient("x").is_cancellation());
    }
}
