//! Directory comparison and synchronization.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use ferry_core::{
    ConflictResolution, OperationKind, OperationOptions, SyncDirection, TransferError,
};
use jwalk::WalkDir;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::copy::{copy_file_chunked, CopyOptions};
use crate::{TransferContext, TransferSummary};

/// Modification times closer than this are considered equal (FAT, network shares).
const MTIME_TOLERANCE: Duration = Duration::from_secs(2);

/// How an entry differs between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum EntryState {
    Identical,
    SourceOnly,
    TargetOnly,
    SourceNewer,
    TargetNewer,
    /// Same modification time, different size.
    Different,
}

/// What synchronization will do with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
pub enum SyncAction {
    CopyToTarget,
    CopyToSource,
    DeleteTarget,
    DeleteSource,
    #[default]
    Skip,
}

/// One file seen on either side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    pub relative_path: PathBuf,
    pub state: EntryState,
    pub source_size: Option<u64>,
    pub target_size: Option<u64>,
    pub action: SyncAction,
}

impl SyncEntry {
    /// Bytes the assigned action will move.
    pub fn transfer_bytes(&self) -> u64 {
        match self.action {
            SyncAction::CopyToTarget => self.source_size.unwrap_or(0),
            SyncAction::CopyToSource => self.target_size.unwrap_or(0),
            _ => 0,
        }
    }
}

/// Options for a directory synchronization.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    /// Delete entries that only exist on the non-authoritative side.
    pub delete_orphans: bool,
    pub preserve_timestamps: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::ToTarget,
            delete_orphans: false,
            preserve_timestamps: true,
        }
    }
}

impl From<&OperationOptions> for SyncOptions {
    fn from(options: &OperationOptions) -> Self {
        Self {
            direction: options.sync_direction,
            delete_orphans: options.sync_delete_orphans,
            preserve_timestamps: options.preserve_timestamps,
        }
    }
}

/// Compares two directory trees and reconciles them.
#[async_trait]
pub trait DirectorySync: Send + Sync {
    /// List every file on either side with its state. Actions start as `Skip`.
    async fn compare_directories(
        &self,
        source: &Path,
        target: &Path,
        options: &SyncOptions,
        ctx: &TransferContext,
    ) -> Result<Vec<SyncEntry>, TransferError>;

    /// Fill in `action` for each entry according to the direction.
    fn auto_assign_actions(&self, entries: &mut [SyncEntry], options: &SyncOptions);

    /// Apply the assigned actions.
    async fn synchronize(
        &self,
        source: &Path,
        target: &Path,
        entries: &[SyncEntry],
        options: &SyncOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;
}

/// [`DirectorySync`] for two local directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSync;

#[derive(Debug, Clone, Copy)]
struct FileStamp {
    size: u64,
    modified: Option<SystemTime>,
}

type Snapshot = BTreeMap<PathBuf, FileStamp>;

fn snapshot(root: &Path, required: bool) -> Result<Snapshot, TransferError> {
    let mut files = Snapshot::new();
    match std::fs::metadata(root) {
        Ok(m) if m.is_dir() => {}
        Ok(_) => {
            return Err(TransferError::invalid_request(format!(
                "Not a directory: {}",
                root.display()
            )));
        }
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(TransferError::io(root, e)),
    }

    let walker = WalkDir::new(root).skip_hidden(false).follow_links(false).min_depth(1);
    for entry_result in walker {
        let entry = entry_result.map_err(|e| TransferError::TransientIo {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let metadata = entry.metadata().map_err(|e| TransferError::TransientIo {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        files.insert(
            relative,
            FileStamp {
                size: metadata.len(),
                modified: metadata.modified().ok(),
            },
        );
    }
    Ok(files)
}

fn compare_stamps(source: FileStamp, target: FileStamp) -> EntryState {
    let (Some(src_time), Some(dst_time)) = (source.modified, target.modified) else {
        return if source.size == target.size {
            EntryState::Identical
        } else {
            EntryState::Different
        };
    };

    let src_ahead = src_time.duration_since(dst_time).unwrap_or(Duration::ZERO);
    let dst_ahead = dst_time.duration_since(src_time).unwrap_or(Duration::ZERO);

    if src_ahead > MTIME_TOLERANCE {
        EntryState::SourceNewer
    } else if dst_ahead > MTIME_TOLERANCE {
        EntryState::TargetNewer
    } else if source.size == target.size {
        EntryState::Identical
    } else {
        EntryState::Different
    }
}

fn diff(source: &Snapshot, target: &Snapshot) -> Vec<SyncEntry> {
    let paths: BTreeSet<&PathBuf> = source.keys().chain(target.keys()).collect();
    paths
        .into_iter()
        .map(|relative| {
            let src = source.get(relative).copied();
            let dst = target.get(relative).copied();
            let state = match (src, dst) {
                (Some(s), Some(d)) => compare_stamps(s, d),
                (Some(_), None) => EntryState::SourceOnly,
                _ => EntryState::TargetOnly,
            };
            SyncEntry {
                relative_path: relative.clone(),
                state,
                source_size: src.map(|s| s.size),
                target_size: dst.map(|d| d.size),
                action: SyncAction::Skip,
            }
        })
        .collect()
}

/// Action for one entry given a direction.
pub fn assign_action(state: EntryState, options: &SyncOptions) -> SyncAction {
    use EntryState::*;
    use SyncAction::*;

    match options.direction {
        SyncDirection::ToTarget => match state {
            Identical => Skip,
            SourceOnly | SourceNewer | TargetNewer | Different => CopyToTarget,
            TargetOnly if options.delete_orphans => DeleteTarget,
            TargetOnly => Skip,
        },
        SyncDirection::ToSource => match state {
            Identical => Skip,
            TargetOnly | SourceNewer | TargetNewer | Different => CopyToSource,
            SourceOnly if options.delete_orphans => DeleteSource,
            SourceOnly => Skip,
        },
        SyncDirection::Bidirectional => match state {
            Identical => Skip,
            SourceOnly | SourceNewer | Different => CopyToTarget,
            TargetOnly | TargetNewer => CopyToSource,
        },
    }
}

async fn copy_entry(
    from_root: &Path,
    to_root: &Path,
    relative: &Path,
    options: &CopyOptions,
    ctx: &TransferContext,
) -> Result<u64, TransferError> {
    let from = from_root.join(relative);
    let to = to_root.join(relative);
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(parent, e))?;
    }
    copy_file_chunked(&from, &to, options, ctx).await
}

async fn delete_entry(path: &Path, ctx: &TransferContext) -> Result<(), TransferError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TransferError::io(path, e)),
    }
    ctx.advance(0, 1, Some(path)).await
}

#[async_trait]
impl DirectorySync for LocalSync {
    async fn compare_directories(
        &self,
        source: &Path,
        target: &Path,
        _options: &SyncOptions,
        ctx: &TransferContext,
    ) -> Result<Vec<SyncEntry>, TransferError> {
        ctx.checkpoint()?;
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let src = snapshot(&source, true)?;
            let dst = snapshot(&target, false)?;
            Ok(diff(&src, &dst))
        })
        .await
        .map_err(|e| TransferError::transient(format!("Task failed: {e}")))?
    }

    fn auto_assign_actions(&self, entries: &mut [SyncEntry], options: &SyncOptions) {
        for entry in entries {
            entry.action = assign_action(entry.state, options);
        }
    }

    async fn synchronize(
        &self,
        source: &Path,
        target: &Path,
        entries: &[SyncEntry],
        options: &SyncOptions,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError> {
        let mut summary = TransferSummary::new(OperationKind::Sync);
        let copy_options = CopyOptions {
            conflict_resolution: ConflictResolution::Overwrite,
            preserve_timestamps: options.preserve_timestamps,
            preserve_attributes: false,
        };

        for entry in entries {
            ctx.checkpoint()?;
            let relative = entry.relative_path.as_path();

            match entry.action {
                SyncAction::CopyToTarget => {
                    let bytes = copy_entry(source, target, relative, &copy_options, ctx).await?;
                    summary.complete_file(bytes);
                }
                SyncAction::CopyToSource => {
                    let bytes = copy_entry(target, source, relative, &copy_options, ctx).await?;
                    summary.complete_file(bytes);
                }
                SyncAction::DeleteTarget => {
                    delete_entry(&target.join(relative), ctx).await?;
                    summary.complete_file(0);
                }
                SyncAction::DeleteSource => {
                    delete_entry(&source.join(relative), ctx).await?;
                    summary.complete_file(0);
                }
                SyncAction::Skip => {
                    ctx.advance(0, 1, Some(relative)).await?;
                    summary.skip_file();
                }
            }
        }

        debug!(
            source = %source.display(),
            target = %target.display(),
            "{}",
            summary.summary()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn set_mtime(path: &Path, ago: Duration) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - ago)
            .unwrap();
    }

    fn find<'a>(entries: &'a [SyncEntry], name: &str) -> &'a SyncEntry {
        entries
            .iter()
            .find(|e| e.relative_path == Path::new(name))
            .unwrap()
    }

    #[test]
    fn test_assign_action_directions() {
        let to_target = SyncOptions::default();
        assert_eq!(assign_action(EntryState::SourceOnly, &to_target), SyncAction::CopyToTarget);
        assert_eq!(assign_action(EntryState::TargetOnly, &to_target), SyncAction::Skip);
        assert_eq!(assign_action(EntryState::Identical, &to_target), SyncAction::Skip);

        let mirror = SyncOptions {
            delete_orphans: true,
            ..Default::default()
        };
        assert_eq!(assign_action(EntryState::TargetOnly, &mirror), SyncAction::DeleteTarget);

        let both = SyncOptions {
            direction: SyncDirection::Bidirectional,
            delete_orphans: true,
            ..Default::default()
        };
        assert_eq!(assign_action(EntryState::TargetNewer, &both), SyncAction::CopyToSource);
        assert_eq!(assign_action(EntryState::TargetOnly, &both), SyncAction::CopyToSource);
        assert_eq!(assign_action(EntryState::SourceNewer, &both), SyncAction::CopyToTarget);
    }

    #[tokio::test]
    async fn test_compare_and_sync_to_target() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("docs")).unwrap();
        fs::create_dir_all(&dst).unwrap();

        fs::write(src.join("docs/new.txt"), b"fresh").unwrap();
        fs::write(src.join("same.txt"), b"same").unwrap();
        fs::write(dst.join("same.txt"), b"same").unwrap();
        set_mtime(&src.join("same.txt"), Duration::from_secs(3600));
        set_mtime(&dst.join("same.txt"), Duration::from_secs(3600));
        fs::write(src.join("changed.txt"), b"version two").unwrap();
        fs::write(dst.join("changed.txt"), b"v1").unwrap();
        set_mtime(&dst.join("changed.txt"), Duration::from_secs(7200));
        fs::write(dst.join("orphan.txt"), b"stale").unwrap();

        let sync = LocalSync;
        let ctx = TransferContext::detached(64);
        let options = SyncOptions {
            delete_orphans: true,
            ..Default::default()
        };

        let mut entries = sync.compare_directories(&src, &dst, &options, &ctx).await.unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(find(&entries, "docs/new.txt").state, EntryState::SourceOnly);
        assert_eq!(find(&entries, "same.txt").state, EntryState::Identical);
        assert_eq!(find(&entries, "changed.txt").state, EntryState::SourceNewer);
        assert_eq!(find(&entries, "orphan.txt").state, EntryState::TargetOnly);

        sync.auto_assign_actions(&mut entries, &options);
        let summary = sync.synchronize(&src, &dst, &entries, &options, &ctx).await.unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(fs::read(dst.join("docs/new.txt")).unwrap(), b"fresh");
        assert_eq!(fs::read(dst.join("changed.txt")).unwrap(), b"version two");
        assert!(!dst.join("orphan.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_target_is_empty_side() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), b"1").unwrap();

        let entries = LocalSync
            .compare_directories(
                &src,
                &temp.path().join("absent"),
                &SyncOptions::default(),
                &TransferContext::detached(64),
            )
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, EntryState::SourceOnly);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let result = LocalSync
            .compare_directories(
                &temp.path().join("absent"),
                temp.path(),
                &SyncOptions::default(),
                &TransferContext::detached(64),
            )
            .await;
        assert!(matches!(result, Err(TransferError::NotFound { .. })));
    }
}
