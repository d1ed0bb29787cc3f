//! The queued operation record and its state machine.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::OperationOptions;

/// Unique identifier for a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl OperationId {
    /// Create a new operation ID.
    #[inline]
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// The kind of transfer an operation performs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
    Upload,
    Download,
    Sync,
    Archive,
    Extract,
}

impl OperationKind {
    /// Whether operations of this kind need a target location.
    pub fn needs_target(&self) -> bool {
        !matches!(self, Self::Delete)
    }
}

/// Lifecycle state of an operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum OperationStatus {
    /// Waiting for its scheduled time.
    Pending,
    /// Waiting in the pending queue for an execution slot.
    Queued,
    /// Holding an execution slot.
    Running,
    /// Stopped by a pause call; resumable.
    Paused,
    Completed,
    /// Failed; retryable while the retry budget lasts.
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Whether the operation has finished (successfully or not).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;

        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Paused)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Queued)
                | (Paused, Cancelled)
                | (Failed, Queued)
                | (Failed, Cancelled)
        )
    }
}

/// Coarse rank that decides dequeue order among waiting operations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Attempted a transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: OperationStatus,
    pub to: OperationStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// One queued unit of work, possibly spanning many files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Source location (local path or `scheme://account/path`).
    pub source_path: String,
    /// Target location; unused by deletes.
    pub target_path: Option<String>,
    /// Explicit file list; `None` means the whole source path.
    pub files: Option<Vec<PathBuf>>,
    pub status: OperationStatus,
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Total bytes to process (0 if unknown).
    pub total_bytes: u64,
    pub total_files: u64,
    pub processed_bytes: u64,
    pub processed_files: u64,
    pub current_file: Option<PathBuf>,
    pub speed_bytes_per_second: f64,
    pub estimated_time_remaining: Option<Duration>,

    pub retry_count: u32,
    pub error_message: Option<String>,
    pub options: OperationOptions,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// Create a fresh record in the `Pending` state.
    pub fn new(
        id: OperationId,
        kind: OperationKind,
        source_path: impl Into<String>,
        target_path: Option<String>,
        options: OperationOptions,
    ) -> Self {
        Self {
            id,
            kind,
            source_path: source_path.into(),
            target_path,
            files: None,
            status: OperationStatus::Pending,
            priority: Priority::Normal,
            scheduled_for: None,
            total_bytes: 0,
            total_files: 0,
            processed_bytes: 0,
            processed_files: 0,
            current_file: None,
            speed_bytes_per_second: 0.0,
            estimated_time_remaining: None,
            retry_count: 0,
            error_message: None,
            options,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, returning the previous status.
    ///
    /// A failed operation can only be cancelled while it still has retries
    /// left; once the budget is spent the failure is final.
    pub fn transition(&mut self, next: OperationStatus) -> Result<OperationStatus, InvalidTransition> {
        let from = self.status;
        let spent = from == OperationStatus::Failed
            && next == OperationStatus::Cancelled
            && !self.can_retry();
        if spent || !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.status = next;
        Ok(from)
    }

    /// Whether the operation has finished.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the operation may be retried.
    pub fn can_retry(&self) -> bool {
        self.status == OperationStatus::Failed && self.retry_count < self.options.max_retries
    }

    /// Bytes still to move (0 if the total is unknown).
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.processed_bytes)
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0
        } else if self.total_files > 0 {
            (self.processed_files as f64 / self.total_files as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Clear per-attempt progress before the executor runs again.
    pub fn reset_progress(&mut self) {
        self.processed_bytes = 0;
        self.processed_files = 0;
        self.current_file = None;
        self.speed_bytes_per_second = 0.0;
        self.estimated_time_remaining = None;
    }

    /// Add progress, keeping processed counters within known totals.
    pub fn record_progress(&mut self, bytes: u64, files: u64) {
        self.processed_bytes = self.processed_bytes.saturating_add(bytes);
        if self.total_bytes > 0 {
            self.processed_bytes = self.processed_bytes.min(self.total_bytes);
        }
        self.processed_files = self.processed_files.saturating_add(files);
        if self.total_files > 0 {
            self.processed_files = self.processed_files.min(self.total_files);
        }
    }

    /// Recompute speed and ETA from the time spent in the current attempt.
    pub fn update_rates(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.speed_bytes_per_second = if secs > 0.0 {
            self.processed_bytes as f64 / secs
        } else {
            0.0
        };
        self.estimated_time_remaining = if self.speed_bytes_per_second > 0.0 && self.total_bytes > 0 {
            Some(Duration::from_secs_f64(
                self.remaining_bytes() as f64 / self.speed_bytes_per_second,
            ))
        } else {
            None
        };
    }

    /// Mark all work as accounted for once the executor reports success.
    pub fn finish_progress(&mut self) {
        if self.total_bytes == 0 {
            self.total_bytes = self.processed_bytes;
        }
        if self.total_files == 0 {
            self.total_files = self.processed_files;
        }
        self.processed_bytes = self.total_bytes;
        self.processed_files = self.total_files;
        self.current_file = None;
        self.estimated_time_remaining = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> Operation {
        Operation::new(
            OperationId::new(1),
            OperationKind::Copy,
            "/src",
            Some("/dst".to_string()),
            OperationOptions::default(),
        )
    }

    #[test]
    fn test_state_machine_edges() {
        use OperationStatus::*;

        assert!(Pending.can_transition_to(Queued));
        assert!(Failed.can_transition_to(Queued));
        assert!(Paused.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Queued));
        assert!(!Cancelled.can_transition_to(Queued));
        assert!(!Pending.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Running));
        assert!(Failed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_transition_returns_previous() {
        let mut op = op();
        assert_eq!(op.transition(OperationStatus::Queued), Ok(OperationStatus::Pending));
        let err = op.transition(OperationStatus::Completed).unwrap_err();
        assert_eq!(err.from, OperationStatus::Queued);
        assert_eq!(op.status, OperationStatus::Queued);
    }

    #[test]
    fn test_failed_cancel_needs_retries_left() {
        let mut waiting = op();
        waiting.options.max_retries = 2;
        waiting.status = OperationStatus::Failed;
        assert_eq!(
            waiting.transition(OperationStatus::Cancelled),
            Ok(OperationStatus::Failed)
        );

        let mut spent = op();
        spent.options.max_retries = 1;
        spent.retry_count = 1;
        spent.status = OperationStatus::Failed;
        let err = spent.transition(OperationStatus::Cancelled).unwrap_err();
        assert_eq!(err.from, OperationStatus::Failed);
        assert_eq!(spent.status, OperationStatus::Failed);
    }

    #[test]
    fn test_progress_is_clamped_to_totals() {
        let mut op = op();
        op.total_bytes = 100;
        op.total_files = 2;
        op.record_progress(80, 1);
        op.record_progress(80, 5);
        assert_eq!(op.processed_bytes, 100);
        assert_eq!(op.processed_files, 2);
        assert_eq!(op.percentage(), 100.0);
    }

    #[test]
    fn test_rates() {
        let mut op = op();
        op.total_bytes = 1000;
        op.record_progress(500, 0);
        op.update_rates(Duration::from_secs(5));
        assert_eq!(op.speed_bytes_per_second, 100.0);
        assert_eq!(op.estimated_time_remaining, Some(Duration::from_secs(5)));

        op.reset_progress();
        op.update_rates(Duration::from_secs(1));
        assert_eq!(op.speed_bytes_per_second, 0.0);
        assert!(op.estimated_time_remaining.is_none());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
    }
}
