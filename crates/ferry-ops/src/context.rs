//! Progress plumbing between the queue and its collaborators.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ferry_core::TransferError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::OPERATION_CHANNEL_SIZE;

/// Receives incremental progress from a running collaborator.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Record `bytes` and `files` processed since the last call.
    ///
    /// May suspend (e.g. to throttle). Returns `Err(TransferError::Cancelled)`
    /// once the operation has been asked to stop.
    async fn advance(
        &self,
        bytes: u64,
        files: u64,
        current_file: Option<&Path>,
    ) -> Result<(), TransferError>;
}

/// Sink that discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn advance(&self, _: u64, _: u64, _: Option<&Path>) -> Result<(), TransferError> {
        Ok(())
    }
}

/// Handle given to every collaborator call.
///
/// Collaborators report through [`TransferContext::advance`] after each chunk,
/// which is also where they observe cancellation.
#[derive(Clone)]
pub struct TransferContext {
    sink: Arc<dyn ProgressSink>,
    token: CancellationToken,
    chunk_size: usize,
}

impl std::fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl TransferContext {
    pub fn new(sink: Arc<dyn ProgressSink>, token: CancellationToken, chunk_size: usize) -> Self {
        Self {
            sink,
            token,
            chunk_size: chunk_size.max(1),
        }
    }

    /// A context with no reporting, for standalone use.
    pub fn detached(chunk_size: usize) -> Self {
        Self::new(Arc::new(NoopProgress), CancellationToken::new(), chunk_size)
    }

    /// Report progress and observe cancellation.
    pub async fn advance(
        &self,
        bytes: u64,
        files: u64,
        current_file: Option<&Path>,
    ) -> Result<(), TransferError> {
        self.checkpoint()?;
        self.sink.advance(bytes, files, current_file).await
    }

    /// Fail with `Cancelled` if the operation has been asked to stop.
    pub fn checkpoint(&self) -> Result<(), TransferError> {
        if self.token.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Preferred read/write chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run synchronous work on the blocking pool, forwarding its progress.
    ///
    /// The closure reports through [`BlockingProgress`]; once the operation is
    /// cancelled its reports fail and it is expected to return early.
    pub async fn run_blocking<T, F>(&self, work: F) -> Result<T, TransferError>
    where
        T: Send + 'static,
        F: FnOnce(&BlockingProgress) -> Result<T, TransferError> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);
        let progress = BlockingProgress {
            tx,
            token: self.token.clone(),
        };

        let handle = tokio::task::spawn_blocking(move || work(&progress));

        let mut interrupted = None;
        while let Some(tick) = rx.recv().await {
            if let Err(e) = self.advance(tick.bytes, tick.files, tick.path.as_deref()).await {
                interrupted = Some(e);
                break;
            }
        }
        drop(rx);

        let result = handle
            .await
            .map_err(|e| TransferError::transient(format!("Task failed: {e}")))?;

        match interrupted {
            Some(e) => Err(e),
            None => result,
        }
    }
}

#[derive(Debug)]
struct Tick {
    bytes: u64,
    files: u64,
    path: Option<PathBuf>,
}

/// Progress reporter usable from blocking code.
#[derive(Debug)]
pub struct BlockingProgress {
    tx: mpsc::Sender<Tick>,
    token: CancellationToken,
}

impl BlockingProgress {
    /// Forward progress to the async side; blocks while its buffer is full.
    pub fn report(&self, bytes: u64, files: u64, path: Option<&Path>) -> Result<(), TransferError> {
        self.checkpoint()?;
        self.tx
            .blocking_send(Tick {
                bytes,
                files,
                path: path.map(Path::to_path_buf),
            })
            .map_err(|_| TransferError::Cancelled)
    }

    pub fn checkpoint(&self) -> Result<(), TransferError> {
        if self.token.is_cancelled() || self.tx.is_closed() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        ticks: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn advance(&self, bytes: u64, files: u64, _: Option<&Path>) -> Result<(), TransferError> {
            self.ticks.lock().unwrap().push((bytes, files));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_blocking_forwards_progress() {
        let recorder = Arc::new(Recorder::default());
        let ctx = TransferContext::new(recorder.clone(), CancellationToken::new(), 16);

        let value = ctx
            .run_blocking(|progress| {
                progress.report(10, 0, None)?;
                progress.report(5, 1, Some(Path::new("a.txt")))?;
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![(10, 0), (5, 1)]);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_blocking_work() {
        let ctx = TransferContext::detached(16);
        ctx.token().cancel();

        let result = ctx
            .run_blocking(|progress| {
                progress.report(1, 0, None)?;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(matches!(ctx.advance(1, 0, None).await, Err(TransferError::Cancelled)));
    }
}
