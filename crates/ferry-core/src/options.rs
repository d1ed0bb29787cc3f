//! Per-operation behavior flags.

use std::path::Path;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How to handle an item that already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ConflictResolution {
    /// Leave the existing item and skip this one.
    Skip,
    /// Replace the existing item.
    #[default]
    Overwrite,
    /// Write next to it with a new name (e.g., "file (1).txt").
    AutoRename,
    /// Fail the operation.
    Abort,
}

/// Container format for archive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Infer the format from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Which side of a sync is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SyncDirection {
    /// Make the target look like the source.
    #[default]
    ToTarget,
    /// Make the source look like the target.
    ToSource,
    /// Newer side wins for each entry.
    Bidirectional,
}

/// Behavior flags for one operation.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
#[serde(default)]
pub struct OperationOptions {
    /// Automatic retries allowed after a retryable failure.
    pub max_retries: u32,
    /// Wait before an automatic retry re-enters the queue, in milliseconds.
    pub retry_delay_ms: u64,
    /// Per-operation speed limit in bytes per second.
    pub speed_limit: Option<u64>,
    pub preserve_timestamps: bool,
    pub preserve_attributes: bool,
    /// Send deleted items to the recycle bin instead of unlinking them.
    pub use_recycle_bin: bool,
    pub conflict_resolution: ConflictResolution,
    pub archive_format: ArchiveFormat,
    /// Compression level passed to the archiver (format default if unset).
    pub compression_level: Option<u32>,
    pub sync_direction: SyncDirection,
    /// Delete entries that only exist on the non-authoritative side.
    pub sync_delete_orphans: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5000,
            speed_limit: None,
            preserve_timestamps: true,
            preserve_attributes: false,
            use_recycle_bin: false,
            conflict_resolution: ConflictResolution::Overwrite,
            archive_format: ArchiveFormat::Zip,
            compression_level: None,
            sync_direction: SyncDirection::ToTarget,
            sync_delete_orphans: false,
        }
    }
}

impl OperationOptions {
    /// Create a new options builder.
    pub fn builder() -> OperationOptionsBuilder {
        OperationOptionsBuilder::default()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = OperationOptions::builder()
            .max_retries(2u32)
            .retry_delay_ms(10u64)
            .speed_limit(Some(1024u64))
            .use_recycle_bin(true)
            .build()
            .unwrap();

        assert_eq!(options.max_retries, 2);
        assert_eq!(options.retry_delay(), Duration::from_millis(10));
        assert_eq!(options.speed_limit, Some(1024));
        assert!(options.use_recycle_bin);
        assert!(options.preserve_timestamps);
    }

    #[test]
    fn test_archive_format_from_path() {
        assert_eq!(ArchiveFormat::from_path(Path::new("a.ZIP")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_path(Path::new("a.rar")), None);
    }
}
