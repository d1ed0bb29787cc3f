//! Submission requests.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{Location, OperationKind, OperationOptions, Priority, TransferError};

/// Everything a caller provides when submitting an operation.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct TransferRequest {
    pub kind: OperationKind,

    /// Source location (local path or `scheme://account/path`).
    pub source: String,

    #[builder(default)]
    #[serde(default)]
    pub target: Option<String>,

    /// Explicit file list; relative entries resolve against the source.
    #[builder(default)]
    #[serde(default)]
    pub files: Option<Vec<PathBuf>>,

    /// Options for this operation; the queue defaults apply when unset.
    #[builder(default)]
    #[serde(default)]
    pub options: Option<OperationOptions>,

    #[builder(default)]
    #[serde(default)]
    pub priority: Priority,

    /// Start no earlier than this instant.
    #[builder(default)]
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl TransferRequestBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.source {
            Some(ref source) if source.trim().is_empty() => {
                Err("Source cannot be empty".to_string())
            }
            None => Err("Source is required".to_string()),
            _ => Ok(()),
        }
    }
}

impl TransferRequest {
    /// Create a new request builder.
    pub fn builder() -> TransferRequestBuilder {
        TransferRequestBuilder::default()
    }

    /// Create a request with default options and priority.
    pub fn new(kind: OperationKind, source: impl Into<String>, target: Option<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            target,
            files: None,
            options: None,
            priority: Priority::Normal,
            scheduled_for: None,
        }
    }

    pub fn copy(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(OperationKind::Copy, source, Some(target.into()))
    }

    pub fn move_to(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(OperationKind::Move, source, Some(target.into()))
    }

    pub fn delete(source: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, source, None)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Parse the source location.
    pub fn source_location(&self) -> Result<Location, TransferError> {
        Location::parse(&self.source)
    }

    /// Parse the target location, enforcing that kinds which need one have one.
    pub fn target_location(&self) -> Result<Option<Location>, TransferError> {
        match (&self.target, self.kind.needs_target()) {
            (Some(target), _) => Location::parse(target).map(Some),
            (None, true) => Err(TransferError::invalid_request(format!(
                "{} requires a target",
                self.kind
            ))),
            (None, false) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = TransferRequest::builder()
            .kind(OperationKind::Upload)
            .source("/data/report.pdf")
            .target(Some("s3://work/reports".to_string()))
            .priority(Priority::High)
            .build()
            .unwrap();

        assert_eq!(request.priority, Priority::High);
        assert!(request.target_location().unwrap().unwrap().is_cloud());
    }

    #[test]
    fn test_request_requires_source() {
        assert!(TransferRequest::builder().kind(OperationKind::Copy).build().is_err());
        assert!(
            TransferRequest::builder()
                .kind(OperationKind::Copy)
                .source("  ")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_missing_target() {
        let request = TransferRequest::new(OperationKind::Copy, "/a", None);
        assert!(matches!(
            request.target_location(),
            Err(TransferError::InvalidRequest { .. })
        ));
        assert!(TransferRequest::delete("/a").target_location().unwrap().is_none());
    }
}
