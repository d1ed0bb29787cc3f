//! Conflict resolution for items that already exist at the destination.

use std::path::{Path, PathBuf};

use ferry_core::{ConflictResolution, TransferError};
use tracing::debug;

/// Where an item should be written after resolving conflicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Write to this path (which is free).
    Write(PathBuf),
    /// Leave the existing item alone.
    Skip,
}

/// Resolve a potential conflict at `dest`.
///
/// `Overwrite` removes the existing item before returning.
pub async fn resolve_destination(
    dest: &Path,
    resolution: ConflictResolution,
) -> Result<Destination, TransferError> {
    let Ok(existing) = tokio::fs::symlink_metadata(dest).await else {
        return Ok(Destination::Write(dest.to_path_buf()));
    };

    debug!(path = %dest.display(), %resolution, "destination exists");

    match resolution {
        ConflictResolution::Skip => Ok(Destination::Skip),
        ConflictResolution::AutoRename => Ok(Destination::Write(auto_rename_path(dest))),
        ConflictResolution::Overwrite => {
            let removed = if existing.is_dir() {
                tokio::fs::remove_dir_all(dest).await
            } else {
                tokio::fs::remove_file(dest).await
            };
            removed.map_err(|e| TransferError::io(dest, e))?;
            Ok(Destination::Write(dest.to_path_buf()))
        }
        ConflictResolution::Abort => Err(TransferError::invalid_request(format!(
            "Destination already exists: {}",
            dest.display()
        ))),
    }
}

/// First free sibling name of the form `name (n).ext`.
///
/// Gives up after 999 candidates and appends the Unix time instead.
pub fn auto_rename_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..1000)
        .map(|n| parent.join(format!("{stem} ({n}){suffix}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            parent.join(format!("{stem}_{secs}{suffix}"))
        })
}
