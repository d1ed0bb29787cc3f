//! Background transfer scheduler for ferry.
//!
//! A [`Scheduler`] accepts transfer requests, keeps every operation in a
//! concurrent registry, orders waiting work by priority and admits it under a
//! resizable concurrency limit. Data movement is delegated to the
//! [`Collaborators`] from `ferry-ops`; progress, state changes and idleness
//! are broadcast as [`QueueEvent`]s.
//!
//! ```no_run
//! use ferry_queue::{QueueConfig, Scheduler, TransferRequest};
//!
//! # async fn run() -> ferry_queue::QueueResult<()> {
//! let scheduler = Scheduler::new(QueueConfig::default());
//! let mut events = scheduler.subscribe();
//! scheduler.start()?;
//!
//! let op = scheduler
//!     .submit(TransferRequest::copy("/data/photos", "/backup"))
//!     .await?;
//! println!("queued {}", op.id);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod admission;
mod dispatch;
mod error;
mod events;
mod executor;
mod gate;
mod pending;
mod registry;
mod scheduler;
mod stats;

pub use dispatch::Collaborators;
pub use error::{QueueError, QueueResult};
pub use events::{EventBus, QueueEvent};
pub use scheduler::Scheduler;
pub use stats::QueueStatistics;

pub use ferry_core::{
    Operation, OperationId, OperationKind, OperationOptions, OperationStatus, Priority,
    QueueConfig, TransferError, TransferRequest,
};
