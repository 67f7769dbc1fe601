use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

/// Per-timeslot mutual exclusion for mutating operations.
///
/// One async mutex per timeslot id, created on first use. Holders of the
/// same id run one at a time in lock-acquisition order (tokio's mutex is
/// FIFO); distinct ids never contend.
#[derive(Default)]
pub struct CapacityGuard {
    slots: DashMap<Ulid, Arc<Mutex<()>>>,
}

/// Exclusive access to one timeslot id. Released on drop, on every exit path.
pub struct SlotPermit {
    id: Ulid,
    _guard: OwnedMutexGuard<()>,
}

impl SlotPermit {
    pub fn id(&self) -> Ulid {
        self.id
    }
}

impl CapacityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other permit for `id` is outstanding, then take it.
    pub async fn acquire(&self, id: Ulid) -> SlotPermit {
        // Clone the Arc while the shard lock is held so `prune` can't drop
        // the entry between lookup and lock.
        let lock = self.slots.entry(id).or_default().value().clone();
        let started = Instant::now();
        let guard = lock.lock_owned().await;
        metrics::histogram!(crate::observability::GUARD_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        SlotPermit { id, _guard: guard }
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.slots.len();
        // The map owns one reference; any permit or waiter owns another.
        self.slots.retain(|_, lock| Arc::strong_count(lock) > 1);
        let after = self.slots.len();
        metrics::gauge!(crate::observability::GUARD_ENTRIES).set(after as f64);
        before - after
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
