use std::sync::Arc;
use std::time::Instant;

use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;
use crate::observability::record_operation;
use crate::store::TimeslotRepository;

/// Inclusive date bounds. A missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<SlotDate>,
    pub end: Option<SlotDate>,
}

impl DateRange {
    pub fn new(start: Option<SlotDate>, end: Option<SlotDate>) -> Self {
        Self { start, end }
    }

    pub fn between(start: SlotDate, end: SlotDate) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn contains(&self, date: SlotDate) -> bool {
        self.start.is_none_or(|s| s <= date) && self.end.is_none_or(|e| date <= e)
    }

    /// True when no date can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(s), Some(e)) if s > e)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub range: DateRange,
    pub category: Option<Category>,
    /// Requesting user. A saved preference record, even an empty one, narrows
    /// the result to its categories.
    pub user_id: Option<String>,
}

/// Read side over the timeslot store. Takes no permits: listings may lag a
/// concurrent write, the engine re-checks everything on mutation.
#[derive(Clone)]
pub struct QueryService {
    repo: Arc<dyn TimeslotRepository>,
}

impl QueryService {
    pub fn new(repo: Arc<dyn TimeslotRepository>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, id: Ulid) -> Result<Timeslot, EngineError> {
        let started = Instant::now();
        let result = match self.repo.get(&id).await {
            Ok(Some(slot)) => Ok(slot),
            Ok(None) => Err(EngineError::NotFound(id)),
            Err(e) => Err(e.into()),
        };
        record_operation("get", started, &result);
        result
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Timeslot>, EngineError> {
        let started = Instant::now();
        let result = self.list_inner(filter).await;
        record_operation("list", started, &result);
        result
    }

    /// Every timeslot regardless of status or date, in listing order.
    pub async fn list_all(&self) -> Result<Vec<Timeslot>, EngineError> {
        self.list(&ListFilter::default()).await
    }

    async fn list_inner(&self, filter: &ListFilter) -> Result<Vec<Timeslot>, EngineError> {
        if filter.range.is_empty() {
            return Ok(Vec::new());
        }

        let preferred = match &filter.user_id {
            Some(user_id) => self
                .repo
                .get_preferences(user_id)
                .await?
                .map(|p| p.categories),
            None => None,
        };

        let mut slots: Vec<Timeslot> = self
            .repo
            .scan()
            .await?
            .into_iter()
            .filter(|s| filter.range.contains(s.date))
            .filter(|s| filter.category.is_none_or(|c| s.category == c))
            .filter(|s| preferred.as_ref().is_none_or(|p| p.contains(&s.category)))
            .collect();
        slots.sort_by_key(Timeslot::sort_key);
        Ok(slots)
    }
}
