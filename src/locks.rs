//! Per-lead execution locks.
//!
//! A pipeline run and an anonymization of the same lead never overlap. Runs use
//! [`LeadLocks::try_acquire`] and give up on contention; anonymization waits
//! with [`LeadLocks::acquire`]. Only guards taken by [`LeadLocks::try_acquire_run`]
//! count as a run in progress.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::LeadId;

/// Held for as long as the owner works on `lead_id`.
#[derive(Debug)]
pub struct LeadGuard {
    lead_id: LeadId,
    running: Option<Arc<Mutex<HashSet<LeadId>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LeadGuard {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&self.lead_id);
        }
    }
}

impl LeadGuard {
    pub fn lead_id(&self) -> LeadId {
        self.lead_id
    }
}

#[derive(Debug, Default)]
pub struct LeadLocks {
    slots: Mutex<HashMap<LeadId, Arc<AsyncMutex<()>>>>,
    running: Arc<Mutex<HashSet<LeadId>>>,
}

impl LeadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, lead_id: LeadId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map holds an idle slot; held or awaited slots have extra refs.
        slots.retain(|id, slot| *id == lead_id || Arc::strong_count(slot) > 1);
        slots.entry(lead_id).or_default().clone()
    }

    /// Takes the lock if nobody holds it.
    pub fn try_acquire(&self, lead_id: LeadId) -> Option<LeadGuard> {
        self.slot(lead_id)
            .try_lock_owned()
            .ok()
            .map(|guard| LeadGuard {
                lead_id,
                running: None,
                _guard: guard,
            })
    }

    /// [`LeadLocks::try_acquire`] for a pipeline run. The lead reports as
    /// running until the guard drops.
    pub fn try_acquire_run(&self, lead_id: LeadId) -> Option<LeadGuard> {
        let mut guard = self.try_acquire(lead_id)?;
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(lead_id);
        guard.running = Some(self.running.clone());
        Some(guard)
    }

    /// Waits until the lock is free.
    pub async fn acquire(&self, lead_id: LeadId) -> LeadGuard {
        let guard = self.slot(lead_id).lock_owned().await;
        LeadGuard {
            lead_id,
            running: None,
            _guard: guard,
        }
    }

    pub fn is_running(&self, lead_id: LeadId) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&lead_id)
    }
}
