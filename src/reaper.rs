use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::guard::CapacityGuard;
use crate::notify::NotifyHub;
use crate::store::{StoreError, WalStore};

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that drops idle guard entries and unheard notification
/// channels.
pub async fn run_pruner(guard: Arc<CapacityGuard>, hub: Arc<NotifyHub>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let removed = guard.prune();
        if removed > 0 {
            debug!("pruned {removed} idle guard entries, {} left", guard.len());
        }
        let closed = hub.prune();
        if closed > 0 {
            debug!("dropped {closed} unheard slot channels, {} left", hub.channel_count());
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when at least `threshold` records were appended since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_needed(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let pending = store.appends_since_compact().await;
    if pending < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!("compacted WAL after {pending} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::store::TimeslotRepository;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn slot() -> Timeslot {
        Timeslot::new(
            Ulid::new(),
            Category::FoodFestivals,
            "2025-06-01".parse().unwrap(),
            "12:00".parse().unwrap(),
            "15:00".parse().unwrap(),
            10,
        )
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let store = WalStore::open(&test_wal_path("threshold.wal")).unwrap();
        for _ in 0..3 {
            store.put(slot(), None).await.unwrap();
        }
        assert!(!compact_if_needed(&store, 4).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 3);

        store.put(slot(), None).await.unwrap();
        assert!(compact_if_needed(&store, 4).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn pruner_clears_idle_entries() {
        let guard = Arc::new(CapacityGuard::new());
        let hub = Arc::new(NotifyHub::new());
        drop(guard.acquire(Ulid::new()).await);
        drop(guard.acquire(Ulid::new()).await);
        drop(hub.subscribe(Ulid::new()));
        let _listening = hub.subscribe(Ulid::new());
        assert_eq!(guard.len(), 2);
        assert_eq!(hub.channel_count(), 2);

        let task = tokio::spawn(run_pruner(guard.clone(), hub.clone(), Duration::from_millis(10)));
        for _ in 0..100 {
            if guard.is_empty() && hub.channel_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert!(guard.is_empty());
        assert_eq!(hub.channel_count(), 1);
    }
}
