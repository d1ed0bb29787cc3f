//! The scheduler handle: submission, queries and control calls.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use ferry_core::{
    Operation, OperationId, OperationStatus, Priority, QueueConfig, TransferRequest,
};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::scheduling_loop;
use crate::dispatch::{probe_totals, resolve_route, Collaborators};
use crate::error::{QueueError, QueueResult};
use crate::events::{EventBus, QueueEvent};
use crate::gate::ConcurrencyGate;
use crate::pending::{PendingQueue, Placement, Slot};
use crate::registry::Registry;
use crate::stats::QueueStatistics;

/// State shared by the handle, the loop and every running task.
pub(crate) struct Shared {
    pub config: QueueConfig,
    pub registry: Registry,
    pub pending: PendingQueue,
    pub gate: ConcurrencyGate,
    pub collaborators: Collaborators,
    pub events: EventBus,
    /// Bytes per second; 0 means unlimited.
    global_speed_limit: AtomicU64,
    next_id: AtomicU64,
    /// Nudges the loop after submissions, requeues and released slots.
    pub wake: Notify,
    /// Spawned attempts whose outcome has not been published yet.
    pub active_tasks: AtomicUsize,
    pub retries_in_flight: AtomicUsize,
    pub queue_empty_signalled: AtomicBool,
    running_loop: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Shared {
    pub fn global_speed_limit(&self) -> Option<u64> {
        match self.global_speed_limit.load(Ordering::SeqCst) {
            0 => None,
            limit => Some(limit),
        }
    }
}

/// A prioritized, resumable transfer queue.
///
/// Cloning the handle is cheap; every clone drives the same queue. Each
/// scheduler owns its registry, queue and gate, so several can coexist.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("operations", &self.shared.registry.len())
            .field("max_concurrent", &self.shared.gate.limit())
            .field("free_slots", &self.shared.gate.available())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl Scheduler {
    /// Create a scheduler backed by the local collaborators.
    pub fn new(config: QueueConfig) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: QueueConfig, collaborators: Collaborators) -> Self {
        let config = config.sanitized();
        let shared = Shared {
            registry: Registry::new(),
            pending: PendingQueue::new(),
            gate: ConcurrencyGate::new(config.max_concurrent_transfers),
            collaborators,
            events: EventBus::new(config.event_capacity),
            global_speed_limit: AtomicU64::new(config.global_speed_limit.unwrap_or(0)),
            next_id: AtomicU64::new(1),
            wake: Notify::new(),
            active_tasks: AtomicUsize::new(0),
            retries_in_flight: AtomicUsize::new(0),
            queue_empty_signalled: AtomicBool::new(false),
            running_loop: Mutex::new(None),
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    // ---- lifecycle ----

    /// Spawn the scheduling loop. Must be called from within a Tokio runtime.
    pub fn start(&self) -> QueueResult<()> {
        let mut running = self
            .shared
            .running_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(QueueError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduling_loop(self.shared.clone(), shutdown.clone()));
        *running = Some((shutdown, handle));
        Ok(())
    }

    /// Pause all running work and halt the loop.
    ///
    /// Queued operations stay queued and run after the next [`start`](Self::start).
    pub async fn stop(&self) -> QueueResult<()> {
        let taken = self
            .shared
            .running_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((shutdown, handle)) = taken else {
            return Err(QueueError::NotRunning);
        };

        for id in self.shared.registry.ids_with_status(&[OperationStatus::Running]) {
            if let Err(e) = self.pause(id) {
                debug!(%id, "not paused on stop: {e}");
            }
        }

        shutdown.cancel();
        if let Err(e) = handle.await {
            warn!("scheduling loop task failed: {e}");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .running_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    // ---- submission & queries ----

    /// Register a new operation.
    ///
    /// Locations are validated here; a rejected request creates no entry.
    /// Size probing is best-effort and never fails the submission.
    pub async fn submit(&self, request: TransferRequest) -> QueueResult<Operation> {
        let collaborators = &self.shared.collaborators;
        let route = resolve_route(
            request.kind,
            &request.source,
            request.target.as_deref(),
            collaborators,
        )?;

        let id = OperationId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let options = request
            .options
            .unwrap_or_else(|| self.shared.config.default_options.clone());

        let mut op = Operation::new(id, request.kind, request.source, request.target, options);
        op.files = request.files;
        op.priority = request.priority;
        op.scheduled_for = request.scheduled_for;

        let (files, bytes) =
            probe_totals(op.kind, &route, op.files.as_deref(), collaborators).await;
        op.total_files = files;
        op.total_bytes = bytes;

        let due = op.scheduled_for.is_none_or(|at| at <= Utc::now());
        {
            let mut queue = self.shared.pending.lock();
            if due {
                // Pending -> Queued is always valid for a fresh record.
                let _ = op.transition(OperationStatus::Queued);
                queue.insert(Slot::of(&op));
            }
            self.shared.registry.insert(op.clone());
        }

        info!(
            %id,
            kind = %op.kind,
            priority = %op.priority,
            status = %op.status,
            files,
            bytes,
            "operation submitted"
        );
        self.shared.wake.notify_one();
        Ok(op)
    }

    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.shared.registry.get(id)
    }

    /// Every operation, ordered by id.
    pub fn get_all(&self) -> Vec<Operation> {
        self.shared.registry.all()
    }

    pub fn get_by_status(&self, statuses: &[OperationStatus]) -> Vec<Operation> {
        self.shared.registry.by_status(statuses)
    }

    /// Queued ids in dequeue order.
    pub fn get_pending_ids(&self) -> Vec<OperationId> {
        self.shared.pending.lock().ids()
    }

    pub fn get_statistics(&self) -> QueueStatistics {
        QueueStatistics::from_operations(&self.shared.registry.all())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    // ---- control ----

    /// Stop a `Running` or `Queued` operation; it can be resumed later.
    pub fn pause(&self, id: OperationId) -> QueueResult<Operation> {
        let mut queue = self.shared.pending.lock();
        let (operation, previous) = self
            .shared
            .registry
            .update(id, |entry| {
                let previous = entry
                    .op
                    .transition(OperationStatus::Paused)
                    .map_err(|t| QueueError::invalid(id, t.from, "pause"))?;
                entry.token.cancel();
                entry.op.speed_bytes_per_second = 0.0;
                entry.op.estimated_time_remaining = None;
                Ok::<_, QueueError>((entry.op.clone(), previous))
            })
            .ok_or(QueueError::UnknownOperation(id))??;
        queue.remove(id);
        drop(queue);

        info!(%id, %previous, "operation paused");
        self.shared.events.emit(QueueEvent::Paused {
            operation: operation.clone(),
            previous,
        });
        Ok(operation)
    }

    /// Put a `Paused` operation back in the queue.
    ///
    /// The executor starts over; progress counters are kept until it is
    /// admitted again.
    pub fn resume(&self, id: OperationId) -> QueueResult<Operation> {
        let operation = self.requeue(id, "resume", |entry| {
            entry
                .op
                .transition(OperationStatus::Queued)
                .map_err(|t| QueueError::invalid(id, t.from, "resume"))?;
            Ok(())
        })?;

        info!(%id, "operation resumed");
        self.shared.events.emit(QueueEvent::Resumed {
            operation: operation.clone(),
        });
        Ok(operation)
    }

    /// Stop an operation for good.
    ///
    /// A failed operation waiting for its automatic retry can be cancelled
    /// too; the pending retry is then dropped.
    pub fn cancel(&self, id: OperationId) -> QueueResult<Operation> {
        let mut queue = self.shared.pending.lock();
        let (operation, previous) = self
            .shared
            .registry
            .update(id, |entry| {
                let previous = entry
                    .op
                    .transition(OperationStatus::Cancelled)
                    .map_err(|t| QueueError::invalid(id, t.from, "cancel"))?;
                entry.token.cancel();
                entry.op.completed_at = Some(Utc::now());
                entry.op.speed_bytes_per_second = 0.0;
                entry.op.estimated_time_remaining = None;
                Ok::<_, QueueError>((entry.op.clone(), previous))
            })
            .ok_or(QueueError::UnknownOperation(id))??;
        queue.remove(id);
        drop(queue);

        info!(%id, %previous, "operation cancelled");
        self.shared.events.emit(QueueEvent::Cancelled {
            operation: operation.clone(),
            previous,
        });
        Ok(operation)
    }

    /// Requeue a `Failed` operation, consuming one retry.
    pub fn retry(&self, id: OperationId) -> QueueResult<Operation> {
        let operation = self.requeue(id, "retry", |entry| {
            if entry.op.status != OperationStatus::Failed {
                return Err(QueueError::invalid(id, entry.op.status, "retry"));
            }
            if !entry.op.can_retry() {
                return Err(QueueError::RetriesExhausted {
                    id,
                    max_retries: entry.op.options.max_retries,
                });
            }
            entry
                .op
                .transition(OperationStatus::Queued)
                .map_err(|t| QueueError::invalid(id, t.from, "retry"))?;
            entry.op.retry_count += 1;
            entry.op.error_message = None;
            entry.op.completed_at = None;
            Ok(())
        })?;

        info!(%id, retry = operation.retry_count, "operation retried");
        self.shared.events.emit(QueueEvent::Retrying {
            operation: operation.clone(),
            delay: Duration::ZERO,
        });
        Ok(operation)
    }

    /// Apply `change` (which must move the entry to `Queued`), give it a
    /// fresh token and enqueue it.
    fn requeue(
        &self,
        id: OperationId,
        action: &'static str,
        change: impl FnOnce(&mut crate::registry::Entry) -> QueueResult<()>,
    ) -> QueueResult<Operation> {
        let mut queue = self.shared.pending.lock();
        let operation = self
            .shared
            .registry
            .update(id, |entry| {
                change(entry)?;
                entry.token = CancellationToken::new();
                Ok::<_, QueueError>(entry.op.clone())
            })
            .ok_or(QueueError::UnknownOperation(id))??;
        queue.insert(Slot::of(&operation));
        drop(queue);

        debug!(%id, action, "operation queued");
        self.shared.wake.notify_one();
        Ok(operation)
    }

    /// Forget an operation, stopping it first if needed.
    pub fn remove(&self, id: OperationId) -> QueueResult<Operation> {
        let entry = {
            let mut queue = self.shared.pending.lock();
            queue.remove(id);
            self.shared.registry.remove(id)
        }
        .ok_or(QueueError::UnknownOperation(id))?;
        entry.token.cancel();

        info!(%id, status = %entry.op.status, "operation removed");
        self.shared.events.emit(QueueEvent::Removed { id });
        Ok(entry.op)
    }

    /// Remove every completed, failed or cancelled operation.
    pub fn clear_completed(&self) -> usize {
        let finished = self.shared.registry.ids_with_status(&[
            OperationStatus::Completed,
            OperationStatus::Failed,
            OperationStatus::Cancelled,
        ]);

        let mut removed = 0;
        for id in finished {
            if self.shared.registry.remove_terminal(id) {
                self.shared.events.emit(QueueEvent::Removed { id });
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleared finished operations");
        }
        removed
    }

    // ---- ordering ----

    /// Change an operation's priority; a queued one is re-slotted.
    pub fn set_priority(&self, id: OperationId, priority: Priority) -> QueueResult<Operation> {
        let mut queue = self.shared.pending.lock();
        let operation = self
            .shared
            .registry
            .update(id, |entry| {
                if entry.op.is_terminal() {
                    return Err(QueueError::invalid(id, entry.op.status, "reprioritize"));
                }
                entry.op.priority = priority;
                Ok(entry.op.clone())
            })
            .ok_or(QueueError::UnknownOperation(id))??;

        if operation.status == OperationStatus::Queued {
            self.reposition_locked(&mut queue, id, Placement::Priority(priority));
        }
        drop(queue);

        debug!(%id, %priority, "priority changed");
        Ok(operation)
    }

    pub fn move_up(&self, id: OperationId) -> QueueResult<()> {
        self.reposition(id, Placement::Up)
    }

    pub fn move_down(&self, id: OperationId) -> QueueResult<()> {
        self.reposition(id, Placement::Down)
    }

    pub fn move_to_top(&self, id: OperationId) -> QueueResult<()> {
        self.reposition(id, Placement::Top)
    }

    pub fn move_to_bottom(&self, id: OperationId) -> QueueResult<()> {
        self.reposition(id, Placement::Bottom)
    }

    fn reposition(&self, id: OperationId, placement: Placement) -> QueueResult<()> {
        let mut queue = self.shared.pending.lock();
        let status = self
            .shared
            .registry
            .status(id)
            .ok_or(QueueError::UnknownOperation(id))?;
        if status != OperationStatus::Queued {
            return Err(QueueError::invalid(id, status, "reorder"));
        }
        if !self.reposition_locked(&mut queue, id, placement) {
            return Err(QueueError::invalid(id, status, "reorder"));
        }
        debug!(%id, ?placement, "operation moved");
        Ok(())
    }

    fn reposition_locked(
        &self,
        queue: &mut crate::pending::Slots,
        id: OperationId,
        placement: Placement,
    ) -> bool {
        let registry = &self.shared.registry;
        queue.reposition(id, placement, |other| {
            registry.status(other) == Some(OperationStatus::Queued)
        })
    }

    // ---- bulk ----

    /// Pause every running or queued operation. Returns the ids paused.
    pub fn pause_all(&self) -> Vec<OperationId> {
        let ids = self
            .shared
            .registry
            .ids_with_status(&[OperationStatus::Running, OperationStatus::Queued]);
        ids.into_iter().filter(|id| self.pause(*id).is_ok()).collect()
    }

    /// Resume every paused operation. Returns the ids resumed.
    pub fn resume_all(&self) -> Vec<OperationId> {
        let ids = self.shared.registry.ids_with_status(&[OperationStatus::Paused]);
        ids.into_iter().filter(|id| self.resume(*id).is_ok()).collect()
    }

    // ---- limits ----

    /// Cap the throughput of each operation; `None` removes the cap.
    ///
    /// Every operation is throttled on its own against this value (or its
    /// own lower limit), so N concurrent transfers can move up to N times it.
    pub fn set_global_speed_limit(&self, bytes_per_second: Option<u64>) {
        let limit = bytes_per_second.filter(|l| *l > 0);
        self.shared
            .global_speed_limit
            .store(limit.unwrap_or(0), Ordering::SeqCst);
        info!(?limit, "global speed limit changed");
    }

    pub fn global_speed_limit(&self) -> Option<u64> {
        self.shared.global_speed_limit()
    }

    /// Resize the concurrency gate. Lowering it never interrupts running work.
    pub fn set_max_concurrent_transfers(&self, limit: usize) -> QueueResult<()> {
        if limit == 0 {
            return Err(QueueError::InvalidConcurrency);
        }
        self.shared.gate.resize(limit);
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn max_concurrent_transfers(&self) -> usize {
        self.shared.gate.limit()
    }
}
