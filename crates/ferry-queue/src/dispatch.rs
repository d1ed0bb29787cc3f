//! Executor dispatch: routes an operation to its collaborator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_core::{
    ArchiveFormat, CloudLocation, Location, Operation, OperationKind, OperationOptions,
    SyncDirection, TransferError,
};
use ferry_ops::{
    probe, ArchiveOps, CloudStorage, DirectorySync, LocalArchiver, LocalFileOps, LocalFs,
    LocalSync, SyncOptions, TransferContext, TransferSummary,
};
use tracing::debug;

/// The collaborators a scheduler delegates data movement to.
#[derive(Clone)]
pub struct Collaborators {
    pub local: Arc<dyn LocalFileOps>,
    /// Needed by cloud routes only; submissions that need it fail without it.
    pub cloud: Option<Arc<dyn CloudStorage>>,
    pub sync: Arc<dyn DirectorySync>,
    pub archive: Arc<dyn ArchiveOps>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            local: Arc::new(LocalFs),
            cloud: None,
            sync: Arc::new(LocalSync),
            archive: Arc::new(LocalArchiver),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("cloud", &self.cloud.is_some())
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    pub fn with_local(mut self, local: Arc<dyn LocalFileOps>) -> Self {
        self.local = local;
        self
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudStorage>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_sync(mut self, sync: Arc<dyn DirectorySync>) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn ArchiveOps>) -> Self {
        self.archive = archive;
        self
    }

    fn cloud(&self, kind: OperationKind) -> Result<&Arc<dyn CloudStorage>, TransferError> {
        self.cloud
            .as_ref()
            .ok_or_else(|| TransferError::unsupported(kind, "no cloud storage is configured"))
    }
}

/// Which collaborator handles an operation, with parsed locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    /// Everything on the local filesystem; `target` is absent for deletes.
    Local {
        source: PathBuf,
        target: Option<PathBuf>,
    },
    Upload {
        source: PathBuf,
        target: CloudLocation,
    },
    Download {
        source: CloudLocation,
        target: PathBuf,
    },
    /// Sync between a local directory and a remote one. `remote_is_source`
    /// flips the direction so it stays relative to the local side.
    CloudSync {
        local: PathBuf,
        remote: CloudLocation,
        remote_is_source: bool,
    },
}

/// Parse locations and check that the kind can run between them.
pub(crate) fn resolve_route(
    kind: OperationKind,
    source: &str,
    target: Option<&str>,
    collaborators: &Collaborators,
) -> Result<Route, TransferError> {
    let source = Location::parse(source)?;
    let target = target.map(Location::parse).transpose()?;

    if kind.needs_target() && target.is_none() {
        return Err(TransferError::invalid_request(format!(
            "{kind} operations need a target location"
        )));
    }

    if let (Location::Cloud(a), Some(Location::Cloud(b))) = (&source, &target) {
        if !a.same_account(b) {
            return Err(TransferError::LocationMismatch {
                message: format!("{a} and {b} belong to different accounts"),
            });
        }
        return Err(TransferError::unsupported(
            kind,
            "transfers between two cloud locations are not supported",
        ));
    }

    let route = match (kind, source, target) {
        (OperationKind::Upload, Location::Local(source), Some(Location::Cloud(target))) => {
            Route::Upload { source, target }
        }
        (OperationKind::Upload, ..) => {
            return Err(TransferError::unsupported(
                kind,
                "upload needs a local source and a cloud target",
            ));
        }
        (OperationKind::Download, Location::Cloud(source), Some(Location::Local(target))) => {
            Route::Download { source, target }
        }
        (OperationKind::Download, ..) => {
            return Err(TransferError::unsupported(
                kind,
                "download needs a cloud source and a local target",
            ));
        }
        (OperationKind::Sync, Location::Local(local), Some(Location::Cloud(remote))) => {
            Route::CloudSync {
                local,
                remote,
                remote_is_source: false,
            }
        }
        (OperationKind::Sync, Location::Cloud(remote), Some(Location::Local(local))) => {
            Route::CloudSync {
                local,
                remote,
                remote_is_source: true,
            }
        }
        (_, Location::Local(source), Some(Location::Local(target))) => Route::Local {
            source,
            target: Some(target),
        },
        (_, Location::Local(source), None) => Route::Local {
            source,
            target: None,
        },
        _ => {
            return Err(TransferError::unsupported(
                kind,
                "this operation type only works on local paths",
            ));
        }
    };

    if matches!(
        route,
        Route::Upload { .. } | Route::Download { .. } | Route::CloudSync { .. }
    ) {
        collaborators.cloud(kind)?;
    }

    Ok(route)
}

/// Paths an operation acts on: its explicit file list, or the source itself.
///
/// Relative entries in the file list are taken relative to the source.
pub(crate) fn source_paths(source: &Path, files: Option<&[PathBuf]>) -> Vec<PathBuf> {
    match files {
        Some(files) if !files.is_empty() => files
            .iter()
            .map(|f| {
                if f.is_absolute() {
                    f.clone()
                } else {
                    source.join(f)
                }
            })
            .collect(),
        _ => vec![source.to_path_buf()],
    }
}

/// Best-effort `(files, bytes)` for a new operation. Never fails.
pub(crate) async fn probe_totals(
    kind: OperationKind,
    route: &Route,
    files: Option<&[PathBuf]>,
    collaborators: &Collaborators,
) -> (u64, u64) {
    match route {
        Route::Local { source, .. } if kind == OperationKind::Extract => {
            if let Some(totals) = collaborators.archive.content_totals(source).await {
                return totals;
            }
            let bytes = tokio::fs::metadata(source).await.map(|m| m.len()).unwrap_or(0);
            (1, bytes)
        }
        Route::Local { source, .. } | Route::Upload { source, .. } => {
            let totals = probe(source_paths(source, files)).await;
            (totals.files, totals.bytes)
        }
        Route::CloudSync { local, .. } => {
            let totals = probe(vec![local.clone()]).await;
            (totals.files, totals.bytes)
        }
        Route::Download { source, .. } => {
            let Some(cloud) = collaborators.cloud.as_ref() else {
                return (1, 0);
            };
            match cloud.get(source).await {
                Ok(entry) if !entry.is_dir => (1, entry.size),
                Ok(_) => (0, 0),
                Err(e) => {
                    debug!(location = %source, "probe failed: {e}");
                    (1, 0)
                }
            }
        }
    }
}

fn archive_format(target: &Path, options: &OperationOptions) -> ArchiveFormat {
    ArchiveFormat::from_path(target).unwrap_or(options.archive_format)
}

fn flipped(direction: SyncDirection) -> SyncDirection {
    match direction {
        SyncDirection::ToTarget => SyncDirection::ToSource,
        SyncDirection::ToSource => SyncDirection::ToTarget,
        SyncDirection::Bidirectional => SyncDirection::Bidirectional,
    }
}

/// Run one attempt of `op`.
pub(crate) async fn dispatch(
    op: &Operation,
    collaborators: &Collaborators,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let route = resolve_route(
        op.kind,
        &op.source_path,
        op.target_path.as_deref(),
        collaborators,
    )?;
    let options = &op.options;

    match route {
        Route::Local { source, target } => {
            let sources = source_paths(&source, op.files.as_deref());
            let target = target.as_deref();
            match (op.kind, target) {
                (OperationKind::Copy, Some(target)) => {
                    collaborators.local.copy(&sources, target, options, ctx).await
                }
                (OperationKind::Move, Some(target)) => {
                    collaborators.local.move_to(&sources, target, options, ctx).await
                }
                (OperationKind::Delete, _) => {
                    collaborators.local.delete(&sources, options, ctx).await
                }
                (OperationKind::Archive, Some(target)) => {
                    collaborators
                        .archive
                        .create_archive(
                            target,
                            &sources,
                            archive_format(target, options),
                            options.compression_level,
                            ctx,
                        )
                        .await
                }
                (OperationKind::Extract, Some(target)) => {
                    collaborators.archive.extract_all(&source, target, ctx).await
                }
                (OperationKind::Sync, Some(target)) => {
                    let sync_options = SyncOptions::from(options);
                    let sync = &collaborators.sync;
                    let mut entries = sync
                        .compare_directories(&source, target, &sync_options, ctx)
                        .await?;
                    sync.auto_assign_actions(&mut entries, &sync_options);
                    sync.synchronize(&source, target, &entries, &sync_options, ctx)
                        .await
                }
                (kind, _) => Err(TransferError::unsupported(
                    kind,
                    "not supported between local paths",
                )),
            }
        }
        Route::Upload { source, target } => {
            let cloud = collaborators.cloud(op.kind)?;
            upload(cloud.as_ref(), &source_paths(&source, op.files.as_deref()), &target, ctx)
                .await
        }
        Route::Download { source, target } => {
            let cloud = collaborators.cloud(op.kind)?;
            download(cloud.as_ref(), &source, &target, ctx).await
        }
        Route::CloudSync {
            local,
            remote,
            remote_is_source,
        } => {
            let cloud = collaborators.cloud(op.kind)?;
            let mut options = options.clone();
            if remote_is_source {
                options.sync_direction = flipped(options.sync_direction);
            }
            cloud.synchronize(&local, &remote, &options, ctx).await
        }
    }
}

async fn upload(
    cloud: &dyn CloudStorage,
    sources: &[PathBuf],
    target: &CloudLocation,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Upload);

    for source in sources {
        let plan = ferry_ops::plan_tree_async(source.clone()).await?;
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for file in &plan.files {
            ctx.checkpoint()?;
            let name = if plan.root_is_dir {
                format!("{base}/{}", file.relative.to_string_lossy().replace('\\', "/"))
            } else {
                base.clone()
            };
            let bytes = cloud.upload(&file.path, &target.join(&name), ctx).await?;
            ctx.advance(0, 1, Some(&file.path)).await?;
            summary.complete_file(bytes);
        }
    }

    Ok(summary)
}

async fn download(
    cloud: &dyn CloudStorage,
    source: &CloudLocation,
    target: &Path,
    ctx: &TransferContext,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Download);
    let root = cloud.get(source).await?;
    let base = target.join(source.file_name().unwrap_or(source.account.as_str()));

    // (remote entry, local path) pairs still to visit.
    let mut pending = vec![(root, base)];
    while let Some((entry, local)) = pending.pop() {
        ctx.checkpoint()?;

        if entry.is_dir {
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|e| TransferError::io(&local, e))?;
            for child in cloud.list(&entry.location).await? {
                let name = child.location.file_name().unwrap_or_default().to_string();
                if name.is_empty() {
                    continue;
                }
                let child_local = local.join(&name);
                pending.push((child, child_local));
            }
            continue;
        }

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }
        let bytes = cloud.download(&entry.location, &local, ctx).await?;
        ctx.advance(0, 1, Some(&local)).await?;
        summary.complete_file(bytes);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_routes() {
        let collab = Collaborators::default();
        let route = resolve_route(OperationKind::Copy, "/a", Some("/b"), &collab).unwrap();
        assert_eq!(
            route,
            Route::Local {
                source: PathBuf::from("/a"),
                target: Some(PathBuf::from("/b")),
            }
        );

        let route = resolve_route(OperationKind::Delete, "file:///tmp/x", None, &collab).unwrap();
        assert!(matches!(route, Route::Local { target: None, .. }));
    }

    #[test]
    fn test_route_rejections() {
        let collab = Collaborators::default();

        let missing_target = resolve_route(OperationKind::Copy, "/a", None, &collab);
        assert!(matches!(missing_target, Err(TransferError::InvalidRequest { .. })));

        let no_cloud = resolve_route(OperationKind::Upload, "/a", Some("s3://acct/b"), &collab);
        assert!(matches!(
            no_cloud,
            Err(TransferError::UnsupportedOperationType { .. })
        ));

        let cloud_copy = resolve_route(OperationKind::Copy, "s3://acct/a", Some("/b"), &collab);
        assert!(matches!(
            cloud_copy,
            Err(TransferError::UnsupportedOperationType { .. })
        ));

        let mismatch =
            resolve_route(OperationKind::Sync, "s3://one/a", Some("s3://two/b"), &collab);
        assert!(matches!(mismatch, Err(TransferError::LocationMismatch { .. })));

        let malformed = resolve_route(OperationKind::Copy, "://nowhere", Some("/b"), &collab);
        assert!(matches!(malformed, Err(TransferError::InvalidLocation { .. })));
    }

    #[test]
    fn test_source_paths() {
        let files = vec![PathBuf::from("a.txt"), PathBuf::from("/abs/b.txt")];
        assert_eq!(
            source_paths(Path::new("/src"), Some(files.as_slice())),
            vec![PathBuf::from("/src/a.txt"), PathBuf::from("/abs/b.txt")]
        );
        assert_eq!(
            source_paths(Path::new("/src"), Some(&[][..])),
            vec![PathBuf::from("/src")]
        );
        assert_eq!(source_paths(Path::new("/src"), None), vec![PathBuf::from("/src")]);
    }
}
