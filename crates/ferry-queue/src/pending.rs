//! Ordered list of operation ids waiting for an execution slot.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ferry_core::{Operation, OperationId, Priority};

/// What the queue needs to know to order an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub id: OperationId,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn of(op: &Operation) -> Self {
        Self {
            id: op.id,
            priority: op.priority,
            created_at: op.created_at,
        }
    }

    /// Whether `self` should be dequeued before `other`.
    fn runs_before(&self, other: &Slot) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.created_at < other.created_at)
    }
}

/// Where to move a queued id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Up,
    Down,
    Top,
    Bottom,
    /// Re-insert according to a new priority.
    Priority(Priority),
}

/// The pending queue; a single coarse lock guards every mutation.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    slots: Mutex<Slots>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the queue. Never held across an await point.
    pub fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Slots {
    inner: VecDeque<Slot>,
}

impl Slots {
    /// Insert by priority, then creation time. Returns false if already queued.
    pub fn insert(&mut self, slot: Slot) -> bool {
        if self.contains(slot.id) {
            return false;
        }
        let index = self
            .inner
            .iter()
            .position(|queued| slot.runs_before(queued))
            .unwrap_or(self.inner.len());
        self.inner.insert(index, slot);
        true
    }

    pub fn pop_front(&mut self) -> Option<Slot> {
        self.inner.pop_front()
    }

    pub fn remove(&mut self, id: OperationId) -> Option<Slot> {
        let index = self.inner.iter().position(|s| s.id == id)?;
        self.inner.remove(index)
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.inner.iter().any(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<OperationId> {
        self.inner.iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drain the queue, splice `id` into its new position and rebuild it.
    ///
    /// Entries for which `still_queued` returns false are dropped on the way.
    /// Returns false if `id` was not queued.
    pub fn reposition(
        &mut self,
        id: OperationId,
        placement: Placement,
        still_queued: impl Fn(OperationId) -> bool,
    ) -> bool {
        let mut drained: Vec<Slot> = self
            .inner
            .drain(..)
            .filter(|s| s.id == id || still_queued(s.id))
            .collect();

        let Some(index) = drained.iter().position(|s| s.id == id) else {
            self.inner = drained.into();
            return false;
        };
        let mut slot = drained.remove(index);

        let target = match placement {
            Placement::Up => index.saturating_sub(1),
            Placement::Down => (index + 1).min(drained.len()),
            Placement::Top => 0,
            Placement::Bottom => drained.len(),
            Placement::Priority(priority) => {
                slot.priority = priority;
                drained
                    .iter()
                    .position(|queued| slot.runs_before(queued))
                    .unwrap_or(drained.len())
            }
        };
        drained.insert(target, slot);
        self.inner = drained.into();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn slot(id: u64, priority: Priority, age_secs: i64) -> Slot {
        Slot {
            id: OperationId::new(id),
            priority,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    fn ids(slots: &Slots) -> Vec<u64> {
        slots.ids().into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_priority_then_creation_order() {
        let queue = PendingQueue::new();
        let mut slots = queue.lock();
        assert!(slots.insert(slot(1, Priority::Normal, 30)));
        assert!(slots.insert(slot(2, Priority::High, 20)));
        assert!(slots.insert(slot(3, Priority::Low, 10)));
        assert!(slots.insert(slot(4, Priority::Normal, 5)));
        // Older entry of equal priority goes ahead of newer ones.
        assert!(slots.insert(slot(5, Priority::Normal, 60)));

        assert_eq!(ids(&slots), vec![2, 5, 1, 4, 3]);
        assert!(!slots.insert(slot(1, Priority::Critical, 0)));
        assert_eq!(slots.pop_front().map(|s| s.id.0), Some(2));
    }

    #[test]
    fn test_positional_moves() {
        let mut slots = Slots::default();
        for id in 1..=4 {
            slots.insert(slot(id, Priority::Normal, 100 - id as i64));
        }

        assert!(slots.reposition(OperationId::new(4), Placement::Top, |_| true));
        assert_eq!(ids(&slots), vec![4, 1, 2, 3]);
        assert!(slots.reposition(OperationId::new(4), Placement::Down, |_| true));
        assert_eq!(ids(&slots), vec![1, 4, 2, 3]);
        assert!(slots.reposition(OperationId::new(1), Placement::Up, |_| true));
        assert_eq!(ids(&slots), vec![1, 4, 2, 3]);
        assert!(slots.reposition(OperationId::new(1), Placement::Bottom, |_| true));
        assert_eq!(ids(&slots), vec![4, 2, 3, 1]);
        assert!(!slots.reposition(OperationId::new(9), Placement::Top, |_| true));
    }

    #[test]
    fn test_priority_reposition_drops_stale_entries() {
        let mut slots = Slots::default();
        for id in 1..=3 {
            slots.insert(slot(id, Priority::Normal, 100 - id as i64));
        }

        let moved = slots.reposition(OperationId::new(3), Placement::Priority(Priority::High), |id| {
            id != OperationId::new(2)
        });
        assert!(moved);
        assert_eq!(ids(&slots), vec![3, 1]);
    }
}
