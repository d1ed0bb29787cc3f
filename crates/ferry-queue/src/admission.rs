//! The scheduling loop: promotes due operations and admits queued ones.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use ferry_core::{OperationId, OperationStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::QueueEvent;
use crate::executor::run_operation;
use crate::gate::GatePermit;
use crate::pending::Slot;
use crate::scheduler::Shared;

/// Drive admission until `shutdown` fires. Does no I/O itself.
pub(crate) async fn scheduling_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    let poll = shared.config.poll_interval();
    info!(
        max_concurrent = shared.gate.limit(),
        poll_ms = poll.as_millis() as u64,
        "scheduling loop started"
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        promote_due(&shared);

        if shared.pending.lock().is_empty() {
            signal_if_idle(&shared);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = shared.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
            continue;
        }

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            // Keep promoting while every slot is busy.
            _ = tokio::time::sleep(poll) => continue,
            permit = shared.gate.acquire() => permit,
        };

        match permit {
            Ok(permit) => admit_next(&shared, permit),
            Err(e) => {
                warn!("concurrency gate closed: {e}");
                break;
            }
        }
    }

    info!("scheduling loop stopped");
}

/// Move `Pending` operations whose time has come into the queue.
fn promote_due(shared: &Shared) {
    let now = Utc::now();
    let due: Vec<OperationId> = shared
        .registry
        .by_status(&[OperationStatus::Pending])
        .into_iter()
        .filter(|op| op.scheduled_for.is_none_or(|at| at <= now))
        .map(|op| op.id)
        .collect();

    for id in due {
        let mut queue = shared.pending.lock();
        let promoted = shared.registry.update(id, |entry| {
            if entry.op.status != OperationStatus::Pending {
                return None;
            }
            entry.op.transition(OperationStatus::Queued).ok()?;
            Some(Slot::of(&entry.op))
        });
        if let Some(Some(slot)) = promoted {
            queue.insert(slot);
            debug!(%id, "scheduled operation promoted");
        }
    }
}

/// Pop the next live id, mark it `Running` and spawn its task.
fn admit_next(shared: &Arc<Shared>, permit: GatePermit) {
    let admitted = {
        let mut queue = shared.pending.lock();
        loop {
            let Some(slot) = queue.pop_front() else {
                break None;
            };
            let started = shared.registry.update(slot.id, |entry| {
                if entry.op.status != OperationStatus::Queued {
                    return None;
                }
                entry.op.transition(OperationStatus::Running).ok()?;
                entry.attempt += 1;
                entry.op.reset_progress();
                entry.op.started_at = Some(Utc::now());
                entry.op.completed_at = None;
                Some((entry.attempt, entry.token.clone()))
            });
            match started.flatten() {
                Some((attempt, token)) => break Some((slot.id, attempt, token, queue.len())),
                None => debug!(id = %slot.id, "skipping stale queue entry"),
            }
        }
    };

    let Some((id, attempt, token, waiting)) = admitted else {
        return;
    };

    shared.active_tasks.fetch_add(1, Ordering::SeqCst);
    shared.queue_empty_signalled.store(false, Ordering::SeqCst);
    debug!(%id, attempt, waiting, "operation admitted");
    tokio::spawn(run_operation(shared.clone(), id, attempt, token, permit));
}

/// Emit `QueueEmpty` once per transition to idle.
fn signal_if_idle(shared: &Shared) {
    // Registry first, then the counters: a failing entry bumps the retry
    // counter before it unlocks.
    let busy = shared
        .registry
        .any_with_status(&[OperationStatus::Running, OperationStatus::Queued]);
    let idle = !busy
        && shared.active_tasks.load(Ordering::SeqCst) == 0
        && shared.retries_in_flight.load(Ordering::SeqCst) == 0;

    if !idle {
        shared.queue_empty_signalled.store(false, Ordering::SeqCst);
        return;
    }
    if !shared.queue_empty_signalled.swap(true, Ordering::SeqCst) {
        info!("queue empty");
        shared.events.emit(QueueEvent::QueueEmpty);
    }
}
