//! Result reporting for collaborator runs.

use ferry_core::OperationKind;
use serde::{Deserialize, Serialize};

/// What a collaborator call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    /// The type of operation.
    pub kind: OperationKind,
    /// Files written, moved or deleted.
    pub succeeded: u64,
    /// Files left alone (conflict skips, already in sync).
    pub skipped: u64,
    /// Bytes moved.
    pub bytes: u64,
}

impl TransferSummary {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            succeeded: 0,
            skipped: 0,
            bytes: 0,
        }
    }

    /// Record a completed file.
    pub fn complete_file(&mut self, bytes: u64) {
        self.succeeded += 1;
        self.bytes += bytes;
    }

    pub fn skip_file(&mut self) {
        self.skipped += 1;
    }

    pub fn merge(&mut self, other: TransferSummary) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }

    /// Get a human-readable summary of the run.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Delete => "Deleted",
            OperationKind::Upload => "Uploaded",
            OperationKind::Download => "Downloaded",
            OperationKind::Sync => "Synchronized",
            OperationKind::Archive => "Archived",
            OperationKind::Extract => "Extracted",
        };

        if self.skipped == 0 {
            format!("{} {} items", action, self.succeeded)
        } else {
            format!(
                "{} {} items, {} skipped",
                action, self.succeeded, self.skipped
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_text() {
        let mut summary = TransferSummary::new(OperationKind::Copy);
        summary.complete_file(10);
        summary.complete_file(5);
        assert_eq!(summary.summary(), "Copied 2 items");

        summary.skip_file();
        assert_eq!(summary.summary(), "Copied 2 items, 1 skipped");
        assert_eq!(summary.bytes, 15);
    }
}
