//! Core types for ferry.
//!
//! This crate provides the data model shared by the transfer queue and its
//! collaborators: the operation record and its state machine, per-operation
//! options, queue configuration, location strings and the error taxonomy.

mod config;
mod error;
mod location;
mod operation;
mod options;
mod request;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use error::TransferError;
pub use location::{CloudLocation, Location};
pub use operation::{
    InvalidTransition, Operation, OperationId, OperationKind, OperationStatus, Priority,
};
pub use options::{
    ArchiveFormat, ConflictResolution, OperationOptions, OperationOptionsBuilder, SyncDirection,
};
pub use request::{TransferRequest, TransferRequestBuilder};
