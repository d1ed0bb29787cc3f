//! Archive creation and extraction (zip, tar, tar.gz).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_core::{ArchiveFormat, OperationKind, TransferError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::context::BlockingProgress;
use crate::walk::{plan_tree, TreePlan};
use crate::{TransferContext, TransferSummary};

/// Create and unpack archives.
#[async_trait]
pub trait ArchiveOps: Send + Sync {
    /// Pack `sources` into a new archive at `destination`.
    async fn create_archive(
        &self,
        destination: &Path,
        sources: &[PathBuf],
        format: ArchiveFormat,
        compression_level: Option<u32>,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;

    /// Unpack every entry of `source` below `destination`.
    async fn extract_all(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError>;

    /// Uncompressed `(files, bytes)` of an archive, when cheaply known.
    async fn content_totals(&self, _source: &Path) -> Option<(u64, u64)> {
        None
    }
}

/// [`ArchiveOps`] backed by the `zip`, `tar` and `flate2` crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalArchiver;

#[async_trait]
impl ArchiveOps for LocalArchiver {
    async fn create_archive(
        &self,
        destination: &Path,
        sources: &[PathBuf],
        format: ArchiveFormat,
        compression_level: Option<u32>,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError> {
        let destination = destination.to_path_buf();
        let sources = sources.to_vec();
        ctx.run_blocking(move |progress| {
            let plans = sources
                .iter()
                .map(|source| plan_tree(source).map(|plan| (source.clone(), plan)))
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
            }

            debug!(archive = %destination.display(), %format, "creating archive");
            match format {
                ArchiveFormat::Zip => write_zip(&destination, &plans, compression_level, progress),
                ArchiveFormat::Tar => {
                    let file = create_file(&destination)?;
                    let (summary, mut out) = write_tar(file, &destination, &plans, progress)?;
                    out.flush().map_err(|e| TransferError::io(&destination, e))?;
                    Ok(summary)
                }
                ArchiveFormat::TarGz => {
                    let file = create_file(&destination)?;
                    let level = Compression::new(compression_level.unwrap_or(6).min(9));
                    let (summary, encoder) =
                        write_tar(GzEncoder::new(file, level), &destination, &plans, progress)?;
                    encoder
                        .finish()
                        .and_then(|mut out| out.flush())
                        .map_err(|e| TransferError::io(&destination, e))?;
                    Ok(summary)
                }
            }
        })
        .await
    }

    async fn extract_all(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &TransferContext,
    ) -> Result<TransferSummary, TransferError> {
        let format = ArchiveFormat::from_path(source).ok_or_else(|| {
            TransferError::invalid_request(format!(
                "Unknown archive format: {}",
                source.display()
            ))
        })?;
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        ctx.run_blocking(move |progress| {
            std::fs::create_dir_all(&destination)
                .map_err(|e| TransferError::io(&destination, e))?;
            let file = File::open(&source).map_err(|e| TransferError::io(&source, e))?;

            debug!(archive = %source.display(), %format, "extracting archive");
            match format {
                ArchiveFormat::Zip => extract_zip(file, &source, &destination, progress),
                ArchiveFormat::Tar => {
                    extract_tar(BufReader::new(file), &source, &destination, progress)
                }
                ArchiveFormat::TarGz => extract_tar(
                    GzDecoder::new(BufReader::new(file)),
                    &source,
                    &destination,
                    progress,
                ),
            }
        })
        .await
    }

    async fn content_totals(&self, source: &Path) -> Option<(u64, u64)> {
        let format = ArchiveFormat::from_path(source)?;
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = File::open(&source).ok()?;
            match format {
                ArchiveFormat::Zip => {
                    let mut archive = ZipArchive::new(file).ok()?;
                    let mut totals = (0u64, 0u64);
                    for i in 0..archive.len() {
                        let entry = archive.by_index_raw(i).ok()?;
                        if !entry.is_dir() {
                            totals.0 += 1;
                            totals.1 += entry.size();
                        }
                    }
                    Some(totals)
                }
                ArchiveFormat::Tar => {
                    let mut archive = tar::Archive::new(BufReader::new(file));
                    let mut totals = (0u64, 0u64);
                    for entry in archive.entries().ok()? {
                        let entry = entry.ok()?;
                        if entry.header().entry_type().is_file() {
                            totals.0 += 1;
                            totals.1 += entry.size();
                        }
                    }
                    Some(totals)
                }
                // Sizes are only known after decompressing everything.
                ArchiveFormat::TarGz => None,
            }
        })
        .await
        .ok()
        .flatten()
    }
}

fn create_file(path: &Path) -> Result<BufWriter<File>, TransferError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| TransferError::io(path, e))
}

/// Reader that reports every read and stops once cancelled.
struct CountingReader<'a, R> {
    inner: R,
    progress: &'a BlockingProgress,
    path: &'a Path,
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.progress
                .report(n as u64, 0, Some(self.path))
                .map_err(|_| io::Error::other("cancelled"))?;
        }
        Ok(n)
    }
}

/// Prefer the cancellation signal over the I/O error it caused.
fn stream_error(progress: &BlockingProgress, path: &Path, err: io::Error) -> TransferError {
    if progress.is_cancelled() {
        TransferError::Cancelled
    } else {
        TransferError::io(path, err)
    }
}

fn zip_error(progress: &BlockingProgress, path: &Path, err: zip::result::ZipError) -> TransferError {
    match err {
        zip::result::ZipError::Io(io) => stream_error(progress, path, io),
        other => TransferError::invalid_request(format!("{}: {other}", path.display())),
    }
}

/// Entry name inside an archive: the source's own name, then the relative path.
fn entry_name(source: &Path, plan: &TreePlan, relative: &Path) -> String {
    let base = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if plan.root_is_dir && !relative.as_os_str().is_empty() {
        Path::new(&base).join(relative)
    } else {
        PathBuf::from(base)
    };
    name.to_string_lossy().replace('\\', "/")
}

fn write_zip(
    destination: &Path,
    plans: &[(PathBuf, TreePlan)],
    compression_level: Option<u32>,
    progress: &BlockingProgress,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Archive);
    let mut writer = ZipWriter::new(create_file(destination)?);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(compression_level.map(i64::from));

    for (source, plan) in plans {
        if plan.root_is_dir {
            writer
                .add_directory(entry_name(source, plan, Path::new("")) + "/", options)
                .map_err(|e| zip_error(progress, destination, e))?;
            for dir in &plan.dirs {
                writer
                    .add_directory(entry_name(source, plan, dir) + "/", options)
                    .map_err(|e| zip_error(progress, destination, e))?;
            }
        }

        for file in &plan.files {
            progress.checkpoint()?;
            writer
                .start_file(entry_name(source, plan, &file.relative), options)
                .map_err(|e| zip_error(progress, destination, e))?;
            let input = File::open(&file.path).map_err(|e| TransferError::io(&file.path, e))?;
            let mut reader = CountingReader {
                inner: input,
                progress,
                path: &file.path,
            };
            let bytes = io::copy(&mut reader, &mut writer)
                .map_err(|e| stream_error(progress, &file.path, e))?;
            progress.report(0, 1, Some(&file.path))?;
            summary.complete_file(bytes);
        }
    }

    writer
        .finish()
        .map_err(|e| zip_error(progress, destination, e))?
        .flush()
        .map_err(|e| TransferError::io(destination, e))?;
    Ok(summary)
}

fn write_tar<W: Write>(
    out: W,
    destination: &Path,
    plans: &[(PathBuf, TreePlan)],
    progress: &BlockingProgress,
) -> Result<(TransferSummary, W), TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Archive);
    let mut builder = tar::Builder::new(out);

    for (source, plan) in plans {
        if plan.root_is_dir {
            builder
                .append_dir(entry_name(source, plan, Path::new("")), source)
                .map_err(|e| TransferError::io(source, e))?;
            for dir in &plan.dirs {
                builder
                    .append_dir(entry_name(source, plan, dir), source.join(dir))
                    .map_err(|e| TransferError::io(source.join(dir), e))?;
            }
        }

        for file in &plan.files {
            progress.checkpoint()?;
            let input = File::open(&file.path).map_err(|e| TransferError::io(&file.path, e))?;
            let metadata = input
                .metadata()
                .map_err(|e| TransferError::io(&file.path, e))?;

            let mut header = tar::Header::new_gnu();
            header.set_metadata(&metadata);
            let reader = CountingReader {
                inner: input,
                progress,
                path: &file.path,
            };
            builder
                .append_data(&mut header, entry_name(source, plan, &file.relative), reader)
                .map_err(|e| stream_error(progress, &file.path, e))?;
            progress.report(0, 1, Some(&file.path))?;
            summary.complete_file(metadata.len());
        }
    }

    let out = builder
        .into_inner()
        .map_err(|e| TransferError::io(destination, e))?;
    Ok((summary, out))
}

fn extract_zip(
    file: File,
    source: &Path,
    destination: &Path,
    progress: &BlockingProgress,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Extract);
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(progress, source, e))?;

    for i in 0..archive.len() {
        progress.checkpoint()?;
        let entry = archive
            .by_index(i)
            .map_err(|e| zip_error(progress, source, e))?;

        // Entries escaping the destination are skipped.
        let Some(relative) = entry.enclosed_name() else {
            debug!(name = entry.name(), "skipping unsafe zip entry");
            summary.skip_file();
            continue;
        };
        let out_path = destination.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| TransferError::io(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| TransferError::io(&out_path, e))?;
        let mut reader = CountingReader {
            inner: entry,
            progress,
            path: &out_path,
        };
        let bytes = io::copy(&mut reader, &mut out)
            .map_err(|e| stream_error(progress, &out_path, e))?;
        progress.report(0, 1, Some(&out_path))?;
        summary.complete_file(bytes);
    }

    Ok(summary)
}

fn extract_tar<R: Read>(
    input: R,
    source: &Path,
    destination: &Path,
    progress: &BlockingProgress,
) -> Result<TransferSummary, TransferError> {
    let mut summary = TransferSummary::new(OperationKind::Extract);
    let mut archive = tar::Archive::new(CountingReader {
        inner: input,
        progress,
        path: source,
    });

    let entries = archive
        .entries()
        .map_err(|e| stream_error(progress, source, e))?;
    for entry in entries {
        progress.checkpoint()?;
        let mut entry = entry.map_err(|e| stream_error(progress, source, e))?;
        let is_file = entry.header().entry_type().is_file();
        let size = entry.size();

        let unpacked = entry
            .unpack_in(destination)
            .map_err(|e| stream_error(progress, destination, e))?;
        if !unpacked {
            summary.skip_file();
        } else if is_file {
            progress.report(0, 1, None)?;
            summary.complete_file(size);
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn sample_tree(root: &Path) -> PathBuf {
        let dir = root.join("photos");
        fs::create_dir_all(dir.join("2024")).unwrap();
        fs::write(dir.join("cover.jpg"), vec![1u8; 2048]).unwrap();
        fs::write(dir.join("2024/beach.jpg"), vec![2u8; 4096]).unwrap();
        dir
    }

    async fn pack_and_unpack(format: ArchiveFormat, name: &str) {
        let temp = TempDir::new().unwrap();
        let dir = sample_tree(temp.path());
        let readme = temp.path().join("README");
        fs::write(&readme, b"read me").unwrap();
        let archive = temp.path().join("out").join(name);
        let ctx = TransferContext::detached(1024);

        let created = LocalArchiver
            .create_archive(&archive, &[dir, readme], format, Some(6), &ctx)
            .await
            .unwrap();
        assert_eq!(created.succeeded, 3);
        assert_eq!(created.bytes, 2048 + 4096 + 7);

        let unpack = temp.path().join("unpacked");
        let extracted = LocalArchiver.extract_all(&archive, &unpack, &ctx).await.unwrap();
        assert_eq!(extracted.succeeded, 3);
        assert_eq!(fs::read(unpack.join("photos/2024/beach.jpg")).unwrap(), vec![2u8; 4096]);
        assert_eq!(fs::read(unpack.join("README")).unwrap(), b"read me");
    }

    #[tokio::test]
    async fn test_zip_round_trip() {
        pack_and_unpack(ArchiveFormat::Zip, "photos.zip").await;
    }

    #[tokio::test]
    async fn test_tar_gz_round_trip() {
        pack_and_unpack(ArchiveFormat::TarGz, "photos.tar.gz").await;
    }

    #[tokio::test]
    async fn test_content_totals() {
        let temp = TempDir::new().unwrap();
        let dir = sample_tree(temp.path());
        let archive = temp.path().join("photos.zip");
        LocalArchiver
            .create_archive(&archive, &[dir], ArchiveFormat::Zip, None, &TransferContext::detached(512))
            .await
            .unwrap();

        assert_eq!(LocalArchiver.content_totals(&archive).await, Some((2, 6144)));
    }

    #[tokio::test]
    async fn test_extract_unknown_format() {
        let temp = TempDir::new().unwrap();
        let bogus = temp.path().join("data.rar");
        fs::write(&bogus, b"nope").unwrap();

        let result = LocalArchiver
            .extract_all(&bogus, temp.path(), &TransferContext::detached(64))
            .await;
        assert!(matches!(result, Err(TransferError::InvalidRequest { .. })));
    }
}
