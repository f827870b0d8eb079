//! Connections shared by every running job (`max_total_connections`).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct ConnectionBudget {
    limit: usize,
    held: AtomicUsize,
}

impl ConnectionBudget {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            held: AtomicUsize::new(0),
        })
    }

    pub fn free(&self) -> usize {
        self.limit.saturating_sub(self.held.load(Ordering::Acquire))
    }

    /// Takes up to `wanted` connections (possibly none). They return to the
    /// budget when the guard drops.
    pub fn take(self: &Arc<Self>, wanted: usize) -> ConnectionSlots {
        let mut granted = 0;
        let _ = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                granted = wanted.min(self.limit.saturating_sub(held));
                Some(held + granted)
            });
        ConnectionSlots {
            budget: Arc::clone(self),
            count: granted,
        }
    }
}

/// Connections held by one job run.
#[derive(Debug)]
pub struct ConnectionSlots {
    budget: Arc<ConnectionBudget>,
    count: usize,
}

impl ConnectionSlots {
    pub fn count(&self) -> usize {
        self.count
    }
}

impl Drop for ConnectionSlots {
    fn drop(&mut self) {
        self.budget.held.fetch_sub(self.count, Ordering::AcqRel);
    }
}
