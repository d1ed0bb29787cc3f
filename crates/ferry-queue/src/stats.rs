//! Queue-wide statistics.

use std::time::Duration;

use ferry_core::{Operation, OperationStatus};
use serde::Serialize;

/// Aggregate view of the registry at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatistics {
    pub total_operations: usize,
    /// `Pending` and `Queued` operations.
    pub pending_operations: usize,
    pub running_operations: usize,
    pub completed_operations: usize,
    pub failed_operations: usize,
    pub paused_operations: usize,
    pub cancelled_operations: usize,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    /// Sum of the speeds of running operations, in bytes per second.
    pub current_speed: f64,
    /// Remaining bytes of unfinished operations over `current_speed`.
    pub estimated_time_remaining: Option<Duration>,
}

impl QueueStatistics {
    pub fn from_operations<'a>(operations: impl IntoIterator<Item = &'a Operation>) -> Self {
        let mut stats = Self::default();
        let mut remaining = 0u64;

        for op in operations {
            stats.total_operations += 1;
            stats.total_bytes += op.total_bytes;
            stats.processed_bytes += op.processed_bytes;

            match op.status {
                OperationStatus::Pending | OperationStatus::Queued => stats.pending_operations += 1,
                OperationStatus::Running => {
                    stats.running_operations += 1;
                    stats.current_speed += op.speed_bytes_per_second;
                }
                OperationStatus::Paused => stats.paused_operations += 1,
                OperationStatus::Completed => stats.completed_operations += 1,
                OperationStatus::Failed => stats.failed_operations += 1,
                OperationStatus::Cancelled => stats.cancelled_operations += 1,
            }

            if !op.is_terminal() {
                remaining += op.remaining_bytes();
            }
        }

        if stats.current_speed > 0.0 {
            stats.estimated_time_remaining =
                Some(Duration::from_secs_f64(remaining as f64 / stats.current_speed));
        }
        stats
    }

    /// Processed over total bytes (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Whether nothing is waiting or running.
    pub fn is_idle(&self) -> bool {
        self.pending_operations == 0 && self.running_operations == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ferry_core::{OperationId, OperationKind, OperationOptions};

    fn op(id: u64, status: OperationStatus, total: u64, processed: u64, speed: f64) -> Operation {
        let mut op = Operation::new(
            OperationId::new(id),
            OperationKind::Copy,
            "/a",
            Some("/b".to_string()),
            OperationOptions::default(),
        );
        op.status = status;
        op.total_bytes = total;
        op.processed_bytes = processed;
        op.speed_bytes_per_second = speed;
        op
    }

    #[test]
    fn test_statistics_aggregate() {
        let ops = [
            op(1, OperationStatus::Running, 1000, 400, 100.0),
            op(2, OperationStatus::Running, 500, 100, 100.0),
            op(3, OperationStatus::Queued, 1000, 0, 0.0),
            op(4, OperationStatus::Completed, 200, 200, 0.0),
            op(5, OperationStatus::Failed, 300, 50, 0.0),
        ];

        let stats = QueueStatistics::from_operations(&ops);
        assert_eq!(stats.total_operations, 5);
        assert_eq!(stats.running_operations, 2);
        assert_eq!(stats.pending_operations, 1);
        assert_eq!(stats.completed_operations, 1);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.total_bytes, 3000);
        assert_eq!(stats.processed_bytes, 750);
        assert_eq!(stats.current_speed, 200.0);
        // (600 + 400 + 1000) / 200
        assert_eq!(stats.estimated_time_remaining, Some(Duration::from_secs(10)));
        assert!(!stats.is_idle());
    }

    #[test]
    fn test_no_eta_without_speed() {
        let ops = [op(1, OperationStatus::Queued, 100, 0, 0.0)];
        let stats = QueueStatistics::from_operations(&ops);
        assert_eq!(stats.estimated_time_remaining, None);
        assert_eq!(stats.percentage(), 0.0);
    }
}
