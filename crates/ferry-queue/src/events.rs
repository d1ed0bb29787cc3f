//! Scheduler events and the broadcast bus that carries them.

use std::path::PathBuf;
use std::time::Duration;

use ferry_core::{Operation, OperationId, OperationStatus};
use serde::Serialize;
use tokio::sync::broadcast;

/// Push notification about a state change, with an operation snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Started {
        operation: Operation,
    },
    Completed {
        operation: Operation,
    },
    Failed {
        operation: Operation,
        previous: OperationStatus,
        /// An automatic retry has been scheduled.
        will_retry: bool,
    },
    Paused {
        operation: Operation,
        previous: OperationStatus,
    },
    Resumed {
        operation: Operation,
    },
    Cancelled {
        operation: Operation,
        previous: OperationStatus,
    },
    /// The operation will re-enter the queue after `delay`.
    Retrying {
        operation: Operation,
        delay: Duration,
    },
    Removed {
        id: OperationId,
    },
    ProgressChanged {
        operation: Operation,
        bytes_delta: u64,
        current_file: Option<PathBuf>,
    },
    /// Nothing is queued or running.
    QueueEmpty,
}

impl QueueEvent {
    /// Id of the operation the event is about.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Self::Started { operation }
            | Self::Completed { operation }
            | Self::Failed { operation, .. }
            | Self::Paused { operation, .. }
            | Self::Resumed { operation }
            | Self::Cancelled { operation, .. }
            | Self::Retrying { operation, .. }
            | Self::ProgressChanged { operation, .. } => Some(operation.id),
            Self::Removed { id } => Some(*id),
            Self::QueueEmpty => None,
        }
    }
}

/// Broadcast bus for scheduler events.
///
/// Slow subscribers lose the oldest events instead of blocking senders.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: QueueEvent) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lagging_subscriber_does_not_block() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(QueueEvent::Removed {
                id: OperationId::new(i),
            });
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.operation_id(), Some(OperationId::new(3)));
    }

    #[test]
    fn test_event_json_tag() {
        let json = serde_json::to_string(&QueueEvent::QueueEmpty).unwrap();
        assert_eq!(json, r#"{"event":"queue_empty"}"#);
    }
}
