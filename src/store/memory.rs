use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

use super::{StoreError, TimeslotRepository};

/// Volatile store. Also the index behind `WalStore`.
#[derive(Default)]
pub struct InMemoryStore {
    timeslots: DashMap<Ulid, Timeslot>,
    preferences: DashMap<String, UserPreferences>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version the next write of `id` gets, if `expected` matches what is stored.
    pub fn next_version(&self, id: &Ulid, expected: Option<u64>) -> Result<u64, StoreError> {
        let found = self.timeslots.get(id).map(|e| e.version);
        if found != expected {
            return Err(StoreError::VersionConflict {
                id: *id,
                expected,
                found,
            });
        }
        Ok(found.map_or(1, |v| v + 1))
    }

    /// Apply a record unconditionally (replay, or after a durable append).
    pub fn apply(&self, record: &Record) {
        match record {
            Record::TimeslotPut(slot) => {
                self.timeslots.insert(slot.id, slot.clone());
            }
            Record::TimeslotRemoved { id } => {
                self.timeslots.remove(id);
            }
            Record::PreferencesPut(prefs) => {
                self.preferences.insert(prefs.user_id.clone(), prefs.clone());
            }
        }
    }

    /// Minimal record set that recreates the current contents.
    pub fn snapshot_records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .timeslots
            .iter()
            .map(|e| Record::TimeslotPut(e.value().clone()))
            .collect();
        records.extend(
            self.preferences
                .iter()
                .map(|e| Record::PreferencesPut(e.value().clone())),
        );
        records
    }

    pub fn get_now(&self, id: &Ulid) -> Option<Timeslot> {
        self.timeslots.get(id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.timeslots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeslots.is_empty()
    }
}

#[async_trait]
impl TimeslotRepository for InMemoryStore {
    async fn get(&self, id: &Ulid) -> Result<Option<Timeslot>, StoreError> {
        Ok(self.get_now(id))
    }

    async fn put(&self, mut slot: Timeslot, expected: Option<u64>) -> Result<Timeslot, StoreError> {
        use dashmap::mapref::entry::Entry;

        // Check and insert under one shard lock.
        match self.timeslots.entry(slot.id) {
            Entry::Occupied(mut e) => {
                let found = e.get().version;
                if expected != Some(found) {
                    return Err(StoreError::VersionConflict {
                        id: slot.id,
                        expected,
                        found: Some(found),
                    });
                }
                slot.version = found + 1;
                e.insert(slot.clone());
            }
            Entry::Vacant(e) => {
                if expected.is_some() {
                    return Err(StoreError::VersionConflict {
                        id: slot.id,
                        expected,
                        found: None,
                    });
                }
                slot.version = 1;
                e.insert(slot.clone());
            }
        }
        Ok(slot)
    }

    async fn remove(&self, id: &Ulid) -> Result<Option<Timeslot>, StoreError> {
        Ok(self.timeslots.remove(id).map(|(_, slot)| slot))
    }

    async fn scan(&self) -> Result<Vec<Timeslot>, StoreError> {
        Ok(self.timeslots.iter().map(|e| e.value().clone()).collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.timeslots.len())
    }

    async fn get_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>, StoreError> {
        Ok(self.preferences.get(user_id).map(|e| e.value().clone()))
    }

    async fn put_preferences(&self, prefs: UserPreferences) -> Result<(), StoreError> {
        self.apply(&Record::PreferencesPut(prefs));
        Ok(())
    }
}
