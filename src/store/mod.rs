mod durable;
mod memory;

pub use durable::WalStore;
pub use memory::InMemoryStore;

use std::fmt;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Timeslot, UserPreferences};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Conditional write lost: the stored version is not the one the caller read.
    VersionConflict {
        id: Ulid,
        expected: Option<u64>,
        found: Option<u64>,
    },
    Wal(String),
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::VersionConflict { id, expected, found } => write!(
                f,
                "version conflict on {id}: expected {expected:?}, found {found:?}"
            ),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Durable keyed storage for timeslots and user preferences.
///
/// `put` is conditional on the version the caller last read (`None` means
/// the key must not exist yet). On success the stored copy, with its new
/// version, is returned. Implementations check and write without holding a
/// lock across the two steps; writers of one id must be serialized by the
/// caller (see `CapacityGuard`).
#[async_trait]
pub trait TimeslotRepository: Send + Sync {
    async fn get(&self, id: &Ulid) -> Result<Option<Timeslot>, StoreError>;

    async fn put(&self, slot: Timeslot, expected: Option<u64>) -> Result<Timeslot, StoreError>;

    async fn remove(&self, id: &Ulid) -> Result<Option<Timeslot>, StoreError>;

    /// Point-in-time copy of every timeslot, in no particular order.
    async fn scan(&self) -> Result<Vec<Timeslot>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn get_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>, StoreError>;

    async fn put_preferences(&self, prefs: UserPreferences) -> Result<(), StoreError>;
}
