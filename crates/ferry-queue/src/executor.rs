//! Execution harness: runs one admitted attempt and records its outcome.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::{OperationId, OperationStatus, TransferError};
use ferry_ops::{ProgressSink, TransferContext};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::dispatch;
use crate::events::QueueEvent;
use crate::gate::GatePermit;
use crate::pending::Slot;
use crate::scheduler::Shared;

/// Delay that keeps `bytes` within `limit` bytes per second.
pub(crate) fn throttle_delay(bytes: u64, limit: u64) -> Duration {
    if limit == 0 {
        return Duration::ZERO;
    }
    let micros = u128::from(bytes) * 1_000_000 / u128::from(limit);
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

/// The tighter of the global and per-operation limits.
pub(crate) fn effective_limit(global: Option<u64>, per_operation: Option<u64>) -> Option<u64> {
    match (global, per_operation.filter(|l| *l > 0)) {
        (Some(g), Some(p)) => Some(g.min(p)),
        (g, p) => g.or(p),
    }
}

/// Progress sink for one attempt: updates the registry, emits
/// `ProgressChanged` and applies throttling.
struct Reporter {
    shared: Arc<Shared>,
    id: OperationId,
    attempt: u64,
    started: Instant,
    token: CancellationToken,
}

#[async_trait]
impl ProgressSink for Reporter {
    async fn advance(
        &self,
        bytes: u64,
        files: u64,
        current_file: Option<&Path>,
    ) -> Result<(), TransferError> {
        let elapsed = self.started.elapsed();
        let update = self.shared.registry.update(self.id, |entry| {
            if entry.attempt != self.attempt || entry.op.status != OperationStatus::Running {
                return None;
            }
            entry.op.record_progress(bytes, files);
            if let Some(path) = current_file {
                entry.op.current_file = Some(path.to_path_buf());
            }
            entry.op.update_rates(elapsed);
            Some(entry.op.clone())
        });

        // Removed, paused or superseded by a newer attempt.
        let Some(Some(snapshot)) = update else {
            return Err(TransferError::Cancelled);
        };

        let limit = effective_limit(self.shared.global_speed_limit(), snapshot.options.speed_limit);
        self.shared.events.emit(QueueEvent::ProgressChanged {
            operation: snapshot,
            bytes_delta: bytes,
            current_file: current_file.map(Path::to_path_buf),
        });

        if let Some(limit) = limit {
            let delay = throttle_delay(bytes, limit);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.token.cancelled() => return Err(TransferError::Cancelled),
                }
            }
        }
        Ok(())
    }
}

/// Run one attempt of `id` to completion, then release its slot.
pub(crate) async fn run_operation(
    shared: Arc<Shared>,
    id: OperationId,
    attempt: u64,
    token: CancellationToken,
    permit: GatePermit,
) {
    execute(&shared, id, attempt, token).await;
    shared.active_tasks.fetch_sub(1, Ordering::SeqCst);
    drop(permit);
    shared.wake.notify_one();
}

async fn execute(shared: &Arc<Shared>, id: OperationId, attempt: u64, token: CancellationToken) {
    let Some(snapshot) = shared.registry.get(id) else {
        return;
    };
    info!(%id, kind = %snapshot.kind, source = %snapshot.source_path, "operation started");
    shared.events.emit(QueueEvent::Started {
        operation: snapshot.clone(),
    });

    let reporter = Reporter {
        shared: shared.clone(),
        id,
        attempt,
        started: Instant::now(),
        token: token.clone(),
    };
    let ctx = TransferContext::new(Arc::new(reporter), token.clone(), shared.config.chunk_size);

    let result = dispatch(&snapshot, &shared.collaborators, &ctx).await;

    match result {
        Ok(summary) => {
            let completed = shared.registry.update(id, |entry| {
                if entry.attempt != attempt || entry.op.status != OperationStatus::Running {
                    return None;
                }
                entry.op.transition(OperationStatus::Completed).ok()?;
                entry.op.finish_progress();
                entry.op.completed_at = Some(Utc::now());
                Some(entry.op.clone())
            });
            match completed.flatten() {
                Some(operation) => {
                    info!(%id, "{}", summary.summary());
                    shared.events.emit(QueueEvent::Completed { operation });
                }
                None => debug!(%id, "finished after it was paused or removed"),
            }
        }
        Err(e) if token.is_cancelled() => {
            // Status was already set by the pause/cancel/remove call.
            debug!(%id, cancelled = e.is_cancellation(), "operation stopped");
        }
        Err(e) => fail(shared, id, attempt, e),
    }
}

fn fail(shared: &Arc<Shared>, id: OperationId, attempt: u64, error: TransferError) {
    let failed = shared.registry.update(id, |entry| {
        if entry.attempt != attempt || entry.op.status != OperationStatus::Running {
            return None;
        }
        let previous = entry.op.transition(OperationStatus::Failed).ok()?;
        entry.op.error_message = Some(error.to_string());
        entry.op.completed_at = Some(Utc::now());
        entry.op.current_file = None;
        entry.op.speed_bytes_per_second = 0.0;
        entry.op.estimated_time_remaining = None;

        let will_retry = error.is_retryable() && entry.op.can_retry();
        if will_retry {
            // Counted before the entry unlocks so the loop never sees an idle gap.
            shared.retries_in_flight.fetch_add(1, Ordering::SeqCst);
        }
        Some((entry.op.clone(), previous, will_retry))
    });

    let Some(Some((operation, previous, will_retry))) = failed else {
        return;
    };

    let delay = operation.options.retry_delay();
    warn!(
        %id,
        retry = operation.retry_count,
        max_retries = operation.options.max_retries,
        will_retry,
        "operation failed: {error}"
    );
    shared.events.emit(QueueEvent::Failed {
        operation: operation.clone(),
        previous,
        will_retry,
    });

    if will_retry {
        shared.events.emit(QueueEvent::Retrying { operation, delay });
        let shared = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            requeue_failed(&shared, id, attempt);
            shared.retries_in_flight.fetch_sub(1, Ordering::SeqCst);
            shared.wake.notify_one();
        });
    }
}

/// Automatic retry after the backoff, unless something else moved the
/// operation on in the meantime.
fn requeue_failed(shared: &Shared, id: OperationId, attempt: u64) {
    let mut queue = shared.pending.lock();
    let requeued = shared.registry.update(id, |entry| {
        if entry.attempt != attempt || entry.op.status != OperationStatus::Failed {
            return None;
        }
        entry.op.transition(OperationStatus::Queued).ok()?;
        entry.op.retry_count += 1;
        entry.op.error_message = None;
        entry.op.completed_at = None;
        entry.token = CancellationToken::new();
        Some(Slot::of(&entry.op))
    });

    if let Some(Some(slot)) = requeued {
        queue.insert(slot);
        info!(%id, "operation requeued for retry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_delay() {
        assert_eq!(throttle_delay(1024 * 1024, 1024 * 1024), Duration::from_secs(1));
        assert_eq!(throttle_delay(256 * 1024, 1024 * 1024), Duration::from_millis(250));
        assert_eq!(throttle_delay(10, 0), Duration::ZERO);
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(None, None), None);
        assert_eq!(effective_limit(Some(100), None), Some(100));
        assert_eq!(effective_limit(None, Some(50)), Some(50));
        assert_eq!(effective_limit(Some(100), Some(50)), Some(50));
        assert_eq!(effective_limit(Some(100), Some(0)), Some(100));
    }
}
