//! Delete operation, either permanent or through the system trash.

use std::path::{Path, PathBuf};

use ferry_core::{OperationKind, OperationOptions, TransferError};
use tracing::debug;

use crate::walk::plan_tree_async;
use crate::{TransferContext, TransferSummary};

/// Options for delete operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Move to the recycle bin instead of deleting permanently.
    pub use_trash: bool,
}

impl From<&OperationOptions> for DeleteOptions {
    fn from(options: &OperationOptions) -> Self {
        Self {
            use_trash: options.use_recycle_bin,
        }
    }
}

/// Delete each target. Targets that no longer exist are skipped.
pub(crate) async fn delete_impl(
    targets: &[PathBuf],
    options: DeleteOptions,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Delete);

    for target in targets {
        ctx.checkpoint()?;

        if tokio::fs::symlink_metadata(target).await.is_err() {
            debug!(path = %target.display(), "already deleted");
            ctx.advance(0, 1, Some(target)).await?;
            summary.skip_file();
            continue;
        }

        let plan = plan_tree_async(target.clone()).await?;

        if options.use_trash {
            let path = target.clone();
            tokio::task::spawn_blocking(move || trash::delete(&path))
                .await
                .map_err(|e| TransferError::transient(format!("Task failed: {e}")))?
                .map_err(|e| trash_error(target, e))?;
            ctx.advance(plan.total_bytes(), plan.file_count(), Some(target))
                .await?;
            summary.succeeded += plan.file_count();
            summary.bytes += plan.total_bytes();
            continue;
        }

        for file in &plan.files {
            tokio::fs::remove_file(&file.path)
                .await
                .map_err(|e| TransferError::io(&file.path, e))?;
            ctx.advance(file.size, 1, Some(&file.path)).await?;
            summary.complete_file(file.size);
        }

        if plan.root_is_dir {
            tokio::fs::remove_dir_all(target)
                .await
                .map_err(|e| TransferError::io(target, e))?;
        }
    }

    Ok(summary)
}

fn trash_error(path: &Path, err: trash::Error) -> TransferError {
    TransferError::TransientIo {
        path: path.to_path_buf(),
        message: format!("Failed to move to trash: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    #[tokio::test]
    async fn test_delete_tree_permanently() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");
        fs::create_dir_all(dir.join("a/b")).unwrap();
        fs::write(dir.join("a/one"), vec![0u8; 10]).unwrap();
        fs::write(dir.join("a/b/two"), vec![0u8; 20]).unwrap();
        let file = temp.path().join("loose.log");
        fs::write(&file, b"log").unwrap();

        let summary = delete_impl(
            &[dir.clone(), file.clone()],
            DeleteOptions::default(),
            &TransferContext::detached(64),
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.bytes, 33);
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn test_delete_missing_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let summary = delete_impl(
            &[temp.path().join("never-existed")],
            DeleteOptions::default(),
            &TransferContext::detached(64),
        )
        .await
        .unwrap();

        assert_eq!(summary.skipped, 1);
    }
}
