//! Limite du nombre de processus d'extraction simultanés

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Gouverneur de concurrence : admission immédiate ou refus, jamais d'attente
#[derive(Clone, Debug)]
pub struct Governor {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl Governor {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Réserve une place, ou `None` si toutes sont occupées
    pub fn try_acquire(&self) -> Option<ProcessSlot> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ProcessSlot {
                permit: Some(permit),
            })
    }

    /// Nombre de places occupées
    pub fn active(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Une place du gouverneur, rendue au plus une fois
#[derive(Debug)]
pub struct ProcessSlot {
    permit: Option<OwnedSemaphorePermit>,
}

impl ProcessSlot {
    /// Rend la place ; les appels suivants (et le drop) sont sans effet
    pub fn release(&mut self) {
        self.permit.take();
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_capacity() {
        let governor = Governor::new(2);
        let a = governor.try_acquire();
        let b = governor.try_acquire();
        let c = governor.try_acquire();

        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(governor.active(), 2);

        drop(a);
        assert_eq!(governor.active(), 1);
        assert!(governor.try_acquire().is_some());
    }

    #[test]
    fn test_release_is_idempotent() {
        let governor = Governor::new(2);
        let mut slot = governor.try_acquire().unwrap();
        let _other = governor.try_acquire().unwrap();

        slot.release();
        slot.release();
        assert!(!slot.is_held());
        assert_eq!(governor.active(), 1);

        drop(slot);
        assert_eq!(governor.active(), 1);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let governor = Governor::new(0);
        assert!(governor.try_acquire().is_none());
        assert_eq!(governor.active(), 0);
    }
}
