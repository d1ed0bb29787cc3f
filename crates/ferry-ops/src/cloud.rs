//! Cloud storage collaborator interface.
//!
//! No provider ships with this crate; embedders plug one in.

use std::path::Path;

use async_trait::async_trait;
use ferry_core::{CloudLocation, OperationOptions, TransferError};
use serde::{Deserialize, Serialize};

use crate::{TransferContext, TransferSummary};

/// Metadata of one remote entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEntry {
    pub location: CloudLocation,
    pub size: u64,
    pub is_dir: bool,
}

/// A remote storage account.
///
/// Transfer methods report bytes through the context; the caller counts
/// files. Cancellation surfaces as [`TransferError::Cancelled`] from
/// [`TransferContext::advance`] and must be propagated unchanged.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Look up one entry.
    async fn get(&self, location: &CloudLocation) -> Result<CloudEntry, TransferError>;

    /// Upload a single local file to `location`. Returns bytes sent.
    async fn upload(
        &self,
        local_file: &Path,
        location: &CloudLocation,
        ctx: &TransferContext,
    ) -> Result<u64, TransferError>;

    /// Download a single remote file to `local_file`. Returns bytes received.
    async fn download(
        &self,
        location: &CloudLocation,
        local_file: &Path,
        ctx: &TransferContext,
    ) -> Result<u64, TransferError>;

    /// Immediate children of a remote directory.
    async fn list(&self, location: &CloudLocation) -> Result<Vec<CloudEntry>, TransferError>;

    /// Reconcile a local directory with a remote one.
    async fn synchronize(
        &self,
        local: &Path,
        remote: &CloudLocation,
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;
}
