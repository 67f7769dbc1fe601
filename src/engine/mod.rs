mod admission;
mod error;
mod mutations;

pub use error::EngineError;

pub(crate) use admission::validate_user;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::guard::{CapacityGuard, SlotPermit};
use crate::limits::MAX_TIMESLOTS;
use crate::model::*;
use crate::notify::NotificationSink;
use crate::store::{StoreError, TimeslotRepository};

/// Authoritative owner of timeslot status and seat state.
///
/// Every mutation of an existing slot runs as: acquire the slot's permit,
/// load, validate, conditional write, emit at most one event, release.
#[derive(Clone)]
pub struct BookingEngine {
    pub(super) repo: Arc<dyn TimeslotRepository>,
    pub(super) guard: Arc<CapacityGuard>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) sink: Arc<dyn NotificationSink>,
    /// Serializes creates so the slot-count ceiling holds under concurrency.
    pub(super) creates: Arc<Mutex<()>>,
    pub(super) max_timeslots: usize,
}

impl BookingEngine {
    pub fn new(
        repo: Arc<dyn TimeslotRepository>,
        guard: Arc<CapacityGuard>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repo,
            guard,
            clock,
            sink,
            creates: Arc::new(Mutex::new(())),
            max_timeslots: MAX_TIMESLOTS,
        }
    }

    /// Lower the slot-count ceiling below `MAX_TIMESLOTS`.
    pub fn with_max_timeslots(mut self, max: usize) -> Self {
        self.max_timeslots = max.min(MAX_TIMESLOTS);
        self
    }

    pub fn guard(&self) -> &Arc<CapacityGuard> {
        &self.guard
    }

    /// Run one operation on its own task. A caller that stops waiting does
    /// not interrupt the write; it completes or fails as a whole.
    pub(super) async fn run_detached<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(BookingEngine) -> Fut,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let result = match tokio::spawn(f(self.clone())).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(EngineError::Storage(StoreError::Unavailable(
                "runtime shutting down".into(),
            ))),
        };
        crate::observability::record_operation(op, started, &result);
        result
    }

    /// Load the slot a held permit covers.
    pub(super) async fn load(&self, permit: &SlotPermit) -> Result<Timeslot, EngineError> {
        self.repo
            .get(&permit.id())
            .await?
            .ok_or(EngineError::NotFound(permit.id()))
    }

    /// Persist a modified slot, conditional on the version it was loaded at.
    pub(super) async fn commit(&self, _permit: &SlotPermit, slot: Timeslot) -> Result<Timeslot, EngineError> {
        let expected = slot.version;
        Ok(self.repo.put(slot, Some(expected)).await?)
    }

    pub(super) fn emit(&self, event: DomainEvent) {
        self.sink.publish(&event);
    }
}
