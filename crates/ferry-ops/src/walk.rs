//! Directory walking shared by the local collaborators.

use std::fs;
use std::path::{Path, PathBuf};

use ferry_core::TransferError;
use jwalk::WalkDir;

/// A regular file found under a walked root.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute (or root-relative as given) path of the file.
    pub path: PathBuf,
    /// Path relative to the walked root; the file name when the root is a file.
    pub relative: PathBuf,
    pub size: u64,
}

/// Everything below a root, in a stable order.
#[derive(Debug, Clone, Default)]
pub struct TreePlan {
    /// Whether the walked root is a directory (else `files` holds just the root).
    pub root_is_dir: bool,
    /// Directories relative to the root, parents before children.
    pub dirs: Vec<PathBuf>,
    pub files: Vec<FileEntry>,
}

impl TreePlan {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn file_count(&self) -> u64 {
        self.files.len() as u64
    }
}

/// Walk `root` and collect its directories and files.
///
/// Unlike [`crate::probe`], any unreadable entry fails the walk: the executors
/// rely on the plan being complete.
pub fn plan_tree(root: &Path) -> Result<TreePlan, TransferError> {
    let metadata = fs::symlink_metadata(root).map_err(|e| TransferError::io(root, e))?;

    if !metadata.is_dir() {
        let relative = root
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| root.to_path_buf());
        return Ok(TreePlan {
            root_is_dir: false,
            dirs: Vec::new(),
            files: vec![FileEntry {
                path: root.to_path_buf(),
                relative,
                size: metadata.len(),
            }],
        });
    }

    let mut plan = TreePlan {
        root_is_dir: true,
        ..Default::default()
    };
    let walker = WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .sort(true)
        .min_depth(1);

    for entry_result in walker {
        let entry = entry_result.map_err(|err| walk_error(root, err))?;
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        if entry.file_type().is_dir() {
            plan.dirs.push(relative);
        } else {
            let metadata = entry.metadata().map_err(|err| walk_error(&path, err))?;
            plan.files.push(FileEntry {
                path,
                relative,
                size: metadata.len(),
            });
        }
    }

    Ok(plan)
}

/// Async wrapper around [`plan_tree`].
pub async fn plan_tree_async(root: PathBuf) -> Result<TreePlan, TransferError> {
    tokio::task::spawn_blocking(move || plan_tree(&root))
        .await
        .map_err(|e| TransferError::transient(format!("Task failed: {e}")))?
}

fn walk_error(root: &Path, err: jwalk::Error) -> TransferError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    match err.io_error() {
        Some(io) => TransferError::io(path, std::io::Error::new(io.kind(), io.to_string())),
        None => TransferError::TransientIo {
            path,
            message: err.to_string(),
        },
    }
}
