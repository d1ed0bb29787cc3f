//! Concurrency gate: a resizable bound on running operations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Bounds how many operations execute at once.
///
/// Shrinking never interrupts admitted work: permits that are out when the
/// limit drops are retired as they come back instead of being returned.
#[derive(Debug)]
pub(crate) struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    /// Permits to retire on release.
    debt: Arc<AtomicUsize>,
    resize_lock: Mutex<()>,
}

/// Held by an admitted operation until its task finishes.
#[derive(Debug)]
pub(crate) struct GatePermit {
    permit: Option<OwnedSemaphorePermit>,
    debt: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            if pay_debt(&self.debt) {
                permit.forget();
            }
        }
    }
}

fn pay_debt(debt: &AtomicUsize) -> bool {
    debt.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
        .is_ok()
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            debt: Arc::new(AtomicUsize::new(0)),
            resize_lock: Mutex::new(()),
        }
    }

    /// Wait for a slot.
    pub async fn acquire(&self) -> Result<GatePermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(GatePermit {
            permit: Some(permit),
            debt: self.debt.clone(),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Change the limit; `limit` must be at least 1.
    pub fn resize(&self, limit: usize) {
        let _guard = self.resize_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let old = self.limit.swap(limit, Ordering::SeqCst);

        if limit > old {
            let mut grow = limit - old;
            while grow > 0 && pay_debt(&self.debt) {
                grow -= 1;
            }
            self.semaphore.add_permits(grow);
        } else if limit < old {
            let shrink = old - limit;
            let mut retired = 0;
            while retired < shrink {
                match self.semaphore.try_acquire() {
                    Ok(permit) => {
                        permit.forget();
                        retired += 1;
                    }
                    Err(_) => break,
                }
            }
            self.debt.fetch_add(shrink - retired, Ordering::SeqCst);
        }

        info!(from = old, to = limit, "concurrency limit changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grow_and_shrink_when_idle() {
        let gate = ConcurrencyGate::new(2);
        gate.resize(4);
        assert_eq!(gate.available(), 4);
        gate.resize(1);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.limit(), 1);
    }

    #[tokio::test]
    async fn test_shrink_retires_permits_on_release() {
        let gate = ConcurrencyGate::new(3);
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();
        let c = gate.acquire().await.unwrap();

        gate.resize(1);
        assert_eq!(gate.available(), 0);

        drop(a);
        drop(b);
        assert_eq!(gate.available(), 0);
        drop(c);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_grow_cancels_outstanding_debt() {
        let gate = ConcurrencyGate::new(2);
        let a = gate.acquire().await.unwrap();
        let b = gate.acquire().await.unwrap();

        gate.resize(1);
        gate.resize(3);
        assert_eq!(gate.available(), 1);

        drop(a);
        drop(b);
        assert_eq!(gate.available(), 3);
    }
}
