//! Transfer collaborators for ferry.
//!
//! This crate defines the interfaces the scheduler drives (local file
//! operations, cloud storage, directory sync, archives) together with
//! baseline local implementations. Every collaborator reports progress and
//! observes cancellation through a [`TransferContext`].

mod archive;
mod cloud;
mod conflict;
mod context;
mod copy;
mod delete;
mod local;
mod move_op;
mod probe;
mod progress;
mod sync;
mod walk;

pub use archive::{ArchiveOps, LocalArchiver};
pub use cloud::{CloudEntry, CloudStorage};
pub use conflict::{auto_rename_path, resolve_destination, Destination};
pub use context::{BlockingProgress, NoopProgress, ProgressSink, TransferContext};
pub use copy::CopyOptions;
pub use delete::DeleteOptions;
pub use local::{LocalFileOps, LocalFs};
pub use move_op::MoveOptions;
pub use probe::{probe, probe_paths, ProbeTotals};
pub use progress::TransferSummary;
pub use sync::{
    assign_action, DirectorySync, EntryState, LocalSync, SyncAction, SyncEntry, SyncOptions,
};
pub use walk::{plan_tree, plan_tree_async, FileEntry, TreePlan};

/// Default channel buffer size for progress forwarded from blocking work.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
