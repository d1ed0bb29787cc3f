//! Async chunked copy with progress reporting.

use std::path::{Path, PathBuf};

use ferry_core::{ConflictResolution, OperationKind, OperationOptions, TransferError};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::conflict::{resolve_destination, Destination};
use crate::walk::{plan_tree_async, TreePlan};
use crate::{TransferContext, TransferSummary};

/// Options for copy operations.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// How to handle items that already exist at the destination.
    pub conflict_resolution: ConflictResolution,
    /// Whether to preserve modification times.
    pub preserve_timestamps: bool,
    /// Whether to preserve permissions.
    pub preserve_attributes: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::Overwrite,
            preserve_timestamps: true,
            preserve_attributes: false,
        }
    }
}

impl From<&OperationOptions> for CopyOptions {
    fn from(options: &OperationOptions) -> Self {
        Self {
            conflict_resolution: options.conflict_resolution,
            preserve_timestamps: options.preserve_timestamps,
            preserve_attributes: options.preserve_attributes,
        }
    }
}

/// Copy each source into `destination`, which is created if missing.
pub(crate) async fn copy_impl(
    sources: &[PathBuf],
    destination: &Path,
    options: &CopyOptions,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Copy);

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| TransferError::io(destination, e))?;

    for source in sources {
        ctx.checkpoint()?;

        let dest_path = destination_for(source, destination)?;
        if dest_path.starts_with(source) {
            return Err(TransferError::invalid_request(format!(
                "Cannot copy {} into itself",
                source.display()
            )));
        }

        let plan = plan_tree_async(source.clone()).await?;

        match resolve_destination(&dest_path, options.conflict_resolution).await? {
            Destination::Skip => {
                ctx.advance(plan.total_bytes(), plan.file_count(), Some(source))
                    .await?;
                summary.skipped += plan.file_count();
            }
            Destination::Write(target) => {
                let copied = copy_tree(&plan, &target, options, ctx).await?;
                summary.merge(copied);
            }
        }
    }

    Ok(summary)
}

/// Where `source` lands inside `destination`.
pub(crate) fn destination_for(source: &Path, destination: &Path) -> Result<PathBuf, TransferError> {
    let name = source.file_name().ok_or_else(|| {
        TransferError::invalid_request(format!("Source has no file name: {}", source.display()))
    })?;
    Ok(destination.join(name))
}

/// Copy a planned tree (or single file) to `target`.
pub(crate) async fn copy_tree(
    plan: &TreePlan,
    target: &Path,
    options: &CopyOptions,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Copy);

    if !plan.root_is_dir {
        for file in &plan.files {
            let bytes = copy_file_chunked(&file.path, target, options, ctx).await?;
            summary.complete_file(bytes);
        }
        return Ok(summary);
    }

    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| TransferError::io(target, e))?;
    for dir in &plan.dirs {
        let path = target.join(dir);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| TransferError::io(&path, e))?;
    }

    for file in &plan.files {
        let dest = target.join(&file.relative);
        let bytes = copy_file_chunked(&file.path, &dest, options, ctx).await?;
        summary.complete_file(bytes);
    }

    Ok(summary)
}

/// Copy one file chunk by chunk, reporting each chunk.
pub(crate) async fn copy_file_chunked(
    source: &Path,
    dest: &Path,
    options: &CopyOptions,
    ctx: &TransferContext,
) -> Result<u64, TransferError> {
    let mut reader = File::open(source)
        .await
        .map_err(|e| TransferError::io(source, e))?;
    let metadata = reader
        .metadata()
        .await
        .map_err(|e| TransferError::io(source, e))?;
    let mut writer = File::create(dest)
        .await
        .map_err(|e| TransferError::io(dest, e))?;

    let mut buf = vec![0u8; ctx.chunk_size()];
    let mut copied = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| TransferError::io(source, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| TransferError::io(dest, e))?;
        copied += n as u64;
        ctx.advance(n as u64, 0, Some(source)).await?;
    }

    writer.flush().await.map_err(|e| TransferError::io(dest, e))?;

    if options.preserve_attributes {
        tokio::fs::set_permissions(dest, metadata.permissions())
            .await
            .map_err(|e| TransferError::io(dest, e))?;
    }

    if options.preserve_timestamps {
        if let Ok(modified) = metadata.modified() {
            let file = writer.into_std().await;
            let dest_owned = dest.to_path_buf();
            tokio::task::spawn_blocking(move || file.set_modified(modified))
                .await
                .map_err(|e| TransferError::transient(format!("Task failed: {e}")))?
                .map_err(|e| TransferError::io(dest_owned, e))?;
        }
    }

    ctx.advance(0, 1, Some(source)).await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_file_and_directory() {
        let temp = TempDir::new().unwrap();
        let src_dir = temp.path().join("album");
        fs::create_dir_all(src_dir.join("raw")).unwrap();
        fs::write(src_dir.join("a.jpg"), vec![7u8; 1000]).unwrap();
        fs::write(src_dir.join("raw/b.cr2"), vec![9u8; 3000]).unwrap();
        let src_file = temp.path().join("notes.txt");
        fs::write(&src_file, b"hello").unwrap();
        let dest = temp.path().join("backup");

        let ctx = TransferContext::detached(512);
        let summary = copy_impl(
            &[src_dir.clone(), src_file.clone()],
            &dest,
            &CopyOptions::default(),
            &ctx,
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.bytes, 4005);
        assert_eq!(fs::read(dest.join("album/raw/b.cr2")).unwrap(), vec![9u8; 3000]);
        assert_eq!(fs::read(dest.join("notes.txt")).unwrap(), b"hello");
        // Sources untouched.
        assert!(src_file.exists());
    }

    #[tokio::test]
    async fn test_copy_preserves_mtime() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("old.txt");
        fs::write(&src, b"data").unwrap();
        let past = SystemTime::now() - Duration::from_secs(86_400);
        fs::File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let dest = temp.path().join("out");
        copy_impl(&[src], &dest, &CopyOptions::default(), &TransferContext::detached(64))
            .await
            .unwrap();

        let copied = fs::metadata(dest.join("old.txt")).unwrap().modified().unwrap();
        let drift = copied
            .duration_since(past)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_copy_into_itself_is_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(&dir).unwrap();

        let result = copy_impl(
            &[dir.clone()],
            &dir.join("inner"),
            &CopyOptions::default(),
            &TransferContext::detached(64),
        )
        .await;
        assert!(matches!(result, Err(TransferError::InvalidRequest { .. })));
    }

    #[tokio::test]
    async fn test_copy_skip_conflict() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.txt");
        fs::write(&src, b"new").unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("a.txt"), b"old").unwrap();

        let options = CopyOptions {
            conflict_resolution: ConflictResolution::Skip,
            ..Default::default()
        };
        let summary = copy_impl(&[src], &dest, &options, &TransferContext::detached(64))
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_cancelled_copy_stops() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("big.bin");
        fs::write(&src, vec![0u8; 4096]).unwrap();

        let ctx = TransferContext::detached(64);
        ctx.token().cancel();
        let result = copy_impl(&[src], &temp.path().join("d"), &CopyOptions::default(), &ctx).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
