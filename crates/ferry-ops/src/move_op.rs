//! Async move operation with progress reporting.

use std::path::{Path, PathBuf};

use ferry_core::{ConflictResolution, OperationKind, OperationOptions, TransferError};
use tracing::debug;

use crate::conflict::{resolve_destination, Destination};
use crate::copy::{copy_tree, destination_for, CopyOptions};
use crate::walk::plan_tree_async;
use crate::{TransferContext, TransferSummary};

/// Options for move operations.
#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub conflict_resolution: ConflictResolution,
    /// Used by the copy fallback when a rename crosses filesystems.
    pub preserve_timestamps: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::Overwrite,
            preserve_timestamps: true,
        }
    }
}

impl From<&OperationOptions> for MoveOptions {
    fn from(options: &OperationOptions) -> Self {
        Self {
            conflict_resolution: options.conflict_resolution,
            preserve_timestamps: options.preserve_timestamps,
        }
    }
}

/// Move each source into `destination`.
///
/// A source that is already gone while its destination exists counts as
/// skipped, so re-running an interrupted move is harmless.
pub(crate) async fn move_impl(
    sources: &[PathBuf],
    destination: &Path,
    options: &MoveOptions,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Move);

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| TransferError::io(destination, e))?;

    for source in sources {
        ctx.checkpoint()?;

        let dest_path = destination_for(source, destination)?;

        // Check for self-move (moving directory into itself)
        if dest_path.starts_with(source) {
            return Err(TransferError::invalid_request(format!(
                "Cannot move {} into itself",
                source.display()
            )));
        }

        if tokio::fs::symlink_metadata(source).await.is_err()
            && tokio::fs::symlink_metadata(&dest_path).await.is_ok()
        {
            debug!(source = %source.display(), "already moved");
            ctx.advance(0, 1, Some(source)).await?;
            summary.skip_file();
            continue;
        }

        let plan = plan_tree_async(source.clone()).await?;

        let target = match resolve_destination(&dest_path, options.conflict_resolution).await? {
            Destination::Skip => {
                ctx.advance(plan.total_bytes(), plan.file_count(), Some(source))
                    .await?;
                summary.skipped += plan.file_count();
                continue;
            }
            Destination::Write(target) => target,
        };

        // Try rename first (fast path for same filesystem)
        if tokio::fs::rename(source, &target).await.is_ok() {
            ctx.advance(plan.total_bytes(), plan.file_count(), Some(source))
                .await?;
            summary.succeeded += plan.file_count();
            summary.bytes += plan.total_bytes();
            continue;
        }

        // Fall back to copy + delete for cross-filesystem moves
        debug!(source = %source.display(), "rename failed, copying instead");
        let copy_options = CopyOptions {
            conflict_resolution: options.conflict_resolution,
            preserve_timestamps: options.preserve_timestamps,
            preserve_attributes: true,
        };
        let copied = copy_tree(&plan, &target, &copy_options, ctx).await?;
        summary.merge(copied);

        let removed = if plan.root_is_dir {
            tokio::fs::remove_dir_all(source).await
        } else {
            tokio::fs::remove_file(source).await
        };
        removed.map_err(|e| TransferError::io(source, e))?;
    }

    Ok(summary)
}
