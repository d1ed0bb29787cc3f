//! Error types for scheduler control calls.

use ferry_core::{OperationId, OperationStatus, TransferError};
use thiserror::Error;

/// Errors returned by [`crate::Scheduler`] methods.
///
/// A rejected call leaves the registry unchanged.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// The call is not valid from the operation's current status.
    #[error("Cannot {action} {id} while it is {from}")]
    InvalidTransition {
        id: OperationId,
        from: OperationStatus,
        action: &'static str,
    },

    #[error("{id} has already used its {max_retries} retries")]
    RetriesExhausted { id: OperationId, max_retries: u32 },

    #[error("Concurrency limit must be at least 1")]
    InvalidConcurrency,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    /// Submission was rejected (bad location, unsupported route, ...).
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub(crate) fn invalid(id: OperationId, from: OperationStatus, action: &'static str) -> Self {
        Self::InvalidTransition { id, from, action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QueueError::invalid(OperationId::new(4), OperationStatus::Completed, "pause");
        assert_eq!(err.to_string(), "Cannot pause op-4 while it is Completed");

        let err: QueueError = TransferError::invalid_request("missing target").into();
        assert_eq!(err.to_string(), "Invalid request: missing target");
    }
}
