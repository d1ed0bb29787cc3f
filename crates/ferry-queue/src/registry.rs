//! Concurrent map from operation id to its record.

use dashmap::DashMap;
use ferry_core::{Operation, OperationId, OperationStatus};
use tokio_util::sync::CancellationToken;

/// Registry slot: the record plus the handles of its current attempt.
#[derive(Debug)]
pub(crate) struct Entry {
    pub op: Operation,
    /// Cancelled by pause/cancel/remove; replaced when the operation is requeued.
    pub token: CancellationToken,
    /// Incremented on every admission; stale executors compare against it.
    pub attempt: u64,
}

/// Source of truth for every operation the scheduler knows about.
///
/// Each entry is guarded by its shard lock, so progress updates of unrelated
/// operations do not contend. Callers must not touch the pending queue while
/// inside [`Registry::update`].
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: DashMap<OperationId, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, op: Operation) {
        self.entries.insert(
            op.id,
            Entry {
                op,
                token: CancellationToken::new(),
                attempt: 0,
            },
        );
    }

    /// Snapshot of one record.
    pub fn get(&self, id: OperationId) -> Option<Operation> {
        self.entries.get(&id).map(|e| e.op.clone())
    }

    pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
        self.entries.get(&id).map(|e| e.op.status)
    }

    /// Snapshot of every record, ordered by id.
    pub fn all(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self.entries.iter().map(|e| e.op.clone()).collect();
        ops.sort_by_key(|op| op.id);
        ops
    }

    pub fn by_status(&self, statuses: &[OperationStatus]) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .entries
            .iter()
            .filter(|e| statuses.contains(&e.op.status))
            .map(|e| e.op.clone())
            .collect();
        ops.sort_by_key(|op| op.id);
        ops
    }

    pub fn ids_with_status(&self, statuses: &[OperationStatus]) -> Vec<OperationId> {
        let mut ids: Vec<OperationId> = self
            .entries
            .iter()
            .filter(|e| statuses.contains(&e.op.status))
            .map(|e| *e.key())
            .collect();
        ids.sort();
        ids
    }

    pub fn any_with_status(&self, statuses: &[OperationStatus]) -> bool {
        self.entries.iter().any(|e| statuses.contains(&e.op.status))
    }

    /// Mutate one entry under its lock.
    pub fn update<R>(&self, id: OperationId, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        self.entries.get_mut(&id).map(|mut e| f(&mut e))
    }

    pub fn remove(&self, id: OperationId) -> Option<Entry> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Remove `id` only if it is still terminal.
    pub fn remove_terminal(&self, id: OperationId) -> bool {
        self.entries
            .remove_if(&id, |_, e| e.op.is_terminal())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
