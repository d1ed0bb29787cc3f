//! Local filesystem collaborator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_core::{OperationOptions, TransferError};

use crate::copy::{copy_impl, CopyOptions};
use crate::delete::{delete_impl, DeleteOptions};
use crate::move_op::{move_impl, MoveOptions};
use crate::{TransferContext, TransferSummary};

/// Copy, move and delete on the local filesystem.
///
/// Implementations report every chunk through the context and stop with
/// [`TransferError::Cancelled`] when asked to.
#[async_trait]
pub trait LocalFileOps: Send + Sync {
    /// Copy each source into the `destination` directory.
    async fn copy(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;

    /// Move each source into the `destination` directory.
    async fn move_to(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;

    async fn delete(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;
}

/// [`LocalFileOps`] backed by `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

#[async_trait]
impl LocalFileOps for LocalFs {
    async fn copy(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError> {
        copy_impl(sources, destination, &CopyOptions::from(options), ctx).await
    }

    async fn move_to(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError> {
        move_impl(sources, destination, &MoveOptions::from(options), ctx).await
    }

    async fn delete(
        &self,
        targets: &[PathBuf],
        options: &OperationOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError> {
        delete_impl(targets, DeleteOptions::from(options), ctx).await
    }
}
