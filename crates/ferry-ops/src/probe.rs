//! Best-effort size probing for submissions.

use std::fs;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;
use tracing::debug;

/// Aggregate size of a set of paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeTotals {
    pub files: u64,
    pub bytes: u64,
    /// Entries that could not be read; each counts as one file of 0 bytes.
    pub unreadable: u64,
}

impl ProbeTotals {
    fn file(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }

    fn unreadable(&mut self) {
        self.files += 1;
        self.unreadable += 1;
    }

    pub fn merge(&mut self, other: ProbeTotals) {
        self.files += other.files;
        self.bytes += other.bytes;
        self.unreadable += other.unreadable;
    }
}

/// Count files and bytes under `paths`. Never fails.
pub fn probe_paths(paths: &[PathBuf]) -> ProbeTotals {
    let mut totals = ProbeTotals::default();
    for path in paths {
        probe_one(path, &mut totals);
    }
    totals
}

/// Async wrapper around [`probe_paths`].
pub async fn probe(paths: Vec<PathBuf>) -> ProbeTotals {
    let count = paths.len() as u64;
    match tokio::task::spawn_blocking(move || probe_paths(&paths)).await {
        Ok(totals) => totals,
        Err(e) => {
            debug!("size probe task failed: {e}");
            ProbeTotals {
                files: count,
                bytes: 0,
                unreadable: count,
            }
        }
    }
}

fn probe_one(path: &Path, totals: &mut ProbeTotals) {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!(path = %path.display(), "unreadable during probe: {e}");
            totals.unreadable();
            return;
        }
    };

    if !metadata.is_dir() {
        totals.file(metadata.len());
        return;
    }

    let walker = WalkDir::new(path).skip_hidden(false).follow_links(false).min_depth(1);
    for entry_result in walker {
        let Ok(entry) = entry_result else {
            totals.unreadable();
            continue;
        };
        if entry.file_type().is_dir() {
            continue;
        }
        match entry.metadata() {
            Ok(m) => totals.file(m.len()),
            Err(_) => totals.unreadable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn test_probe_counts_files_and_bytes() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("dir");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("a"), vec![1u8; 100]).unwrap();
        fs::write(dir.join("nested/b"), vec![1u8; 50]).unwrap();
        let single = temp.path().join("single");
        fs::write(&single, vec![1u8; 10]).unwrap();

        let totals = probe_paths(&[dir, single]);
        assert_eq!(totals.files, 3);
        assert_eq!(totals.bytes, 160);
        assert_eq!(totals.unreadable, 0);
    }

    #[test]
    fn test_probe_tolerates_missing_paths() {
        let temp = TempDir::new().unwrap();
        let present = temp.path().join("present");
        fs::write(&present, vec![1u8; 7]).unwrap();

        let totals = probe_paths(&[temp.path().join("missing"), present]);
        assert_eq!(totals.files, 2);
        assert_eq!(totals.bytes, 7);
        assert_eq!(totals.unreadable, 1);
    }
}
