use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{InMemoryStore, StoreError, TimeslotRepository};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Apply the batch to the index, then respond to all senders.
///
/// Records become visible only after they are durable, and a compaction
/// snapshot always includes every record flushed before it.
async fn wal_writer_loop(mut wal: Wal, index: Arc<InMemoryStore>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => {
                            batch.push((record, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            commit_batch(&mut wal, &index, &mut batch);
                            handle_non_append(&mut wal, &index, other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                if !batch.is_empty() {
                    commit_batch(&mut wal, &index, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, &index, other),
        }
    }
}

fn commit_batch(
    wal: &mut Wal,
    index: &InMemoryStore,
    batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>,
) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    match &result {
        Ok(()) => {
            for (record, _) in batch.iter() {
                index.apply(record);
            }
        }
        Err(e) => {
            warn!("WAL batch of {} failed: {e}", batch.len());
            // Failed records must not resurface on replay.
            if let Err(e) = wal.rollback() {
                error!("WAL rollback failed, rejecting appends until it recovers: {e}");
            }
        }
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Record, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (record, _) in batch {
        wal.append_buffered(record)?;
    }
    wal.flush_sync()
}

fn respond_batch(batch: &mut Vec<(Record, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, index: &InMemoryStore, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let records = index.snapshot_records();
            let _ = response.send(wal.compact(&records));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Durable store: an in-memory index fronted by a group-commit WAL.
pub struct WalStore {
    index: Arc<InMemoryStore>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the WAL at `path`, cut off any torn tail, and start the writer
    /// task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::start(Self::recover(path)?))
    }

    fn recover(path: &Path) -> io::Result<(Arc<InMemoryStore>, Wal)> {
        let recovered = Wal::recover(path)?;
        if recovered.discarded_bytes > 0 {
            warn!(
                "discarded {} bytes of torn WAL tail in {}",
                recovered.discarded_bytes,
                path.display()
            );
        }
        let index = Arc::new(InMemoryStore::new());
        for record in &recovered.records {
            index.apply(record);
        }
        info!(
            "replayed {} WAL records from {}, {} timeslots live",
            recovered.records.len(),
            path.display(),
            index.len()
        );
        Ok((index, Wal::open(path)?))
    }

    fn start((index, wal): (Arc<InMemoryStore>, Wal)) -> Self {
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, index.clone(), wal_rx));
        Self { index, wal_tx }
    }

    /// Like `open`, but every fsync fails after writing while `switch` is set.
    #[cfg(test)]
    pub(crate) fn open_with_sync_fault(
        path: &Path,
        switch: Arc<std::sync::atomic::AtomicBool>,
    ) -> io::Result<Self> {
        let (index, mut wal) = Self::recover(path)?;
        wal.fail_syncs_when(switch);
        Ok(Self::start((index, wal)))
    }

    /// Write a record via the background group-commit writer. Returns once
    /// the record is durable and applied.
    async fn append(&self, record: Record) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                record,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the WAL as one record per live key.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl TimeslotRepository for WalStore {
    async fn get(&self, id: &Ulid) -> Result<Option<Timeslot>, StoreError> {
        Ok(self.index.get_now(id))
    }

    async fn put(&self, mut slot: Timeslot, expected: Option<u64>) -> Result<Timeslot, StoreError> {
        slot.version = self.index.next_version(&slot.id, expected)?;
        self.append(Record::TimeslotPut(slot.clone())).await?;
        Ok(slot)
    }

    async fn remove(&self, id: &Ulid) -> Result<Option<Timeslot>, StoreError> {
        let Some(existing) = self.index.get_now(id) else {
            return Ok(None);
        };
        self.append(Record::TimeslotRemoved { id: *id }).await?;
        Ok(Some(existing))
    }

    async fn scan(&self) -> Result<Vec<Timeslot>, StoreError> {
        self.index.scan().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.index.len())
    }

    async fn get_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>, StoreError> {
        self.index.get_preferences(user_id).await
    }

    async fn put_preferences(&self, prefs: UserPreferences) -> Result<(), StoreError> {
        self.append(Record::PreferencesPut(prefs)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn slot(capacity: u32) -> Timeslot {
        Timeslot::new(
            Ulid::new(),
            Category::TechConferences,
            "2025-09-01".parse().unwrap(),
            "10:00".parse().unwrap(),
            "12:00".parse().unwrap(),
            capacity,
        )
    }

    #[tokio::test]
    async fn writes_survive_reopen() {
        let path = test_wal_path("reopen.wal");
        let (kept, gone) = {
            let store = WalStore::open(&path).unwrap();
            let mut kept = store.put(slot(3), None).await.unwrap();
            kept.booked_by.push("alice".into());
            let kept = store.put(kept, Some(1)).await.unwrap();
            let gone = store.put(slot(1), None).await.unwrap();
            store.remove(&gone.id).await.unwrap();
            store
                .put_preferences(UserPreferences {
                    user_id: "alice".into(),
                    categories: [Category::Movies].into_iter().collect(),
                })
                .await
                .unwrap();
            (kept, gone)
        };

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.get(&kept.id).await.unwrap(), Some(kept));
        assert!(store.get(&gone.id).await.unwrap().is_none());
        let prefs = store.get_preferences("alice").await.unwrap().unwrap();
        assert!(prefs.categories.contains(&Category::Movies));
    }

    #[tokio::test]
    async fn conditional_put_checked_before_append() {
        let path = test_wal_path("conditional.wal");
        let store = WalStore::open(&path).unwrap();
        let s = store.put(slot(2), None).await.unwrap();
        store.put(s.clone(), Some(1)).await.unwrap();
        let before = store.appends_since_compact().await;

        let err = store.put(s, Some(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { found: Some(2), .. }));
        assert_eq!(store.appends_since_compact().await, before);
    }

    #[tokio::test]
    async fn compact_keeps_live_state() {
        let path = test_wal_path("compact.wal");
        let live = {
            let store = WalStore::open(&path).unwrap();
            let mut live = store.put(slot(5), None).await.unwrap();
            for user in ["a", "b", "c"] {
                let expected = live.version;
                live.booked_by.push(user.into());
                live = store.put(live, Some(expected)).await.unwrap();
            }
            for _ in 0..10 {
                let tmp = store.put(slot(1), None).await.unwrap();
                store.remove(&tmp.id).await.unwrap();
            }
            assert_eq!(store.appends_since_compact().await, 24);

            store.compact().await.unwrap();
            assert_eq!(store.appends_since_compact().await, 0);
            live
        };

        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.scan().await.unwrap(), vec![live]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_all_land() {
        let path = test_wal_path("concurrent.wal");
        let store = Arc::new(WalStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.put(slot(1), None).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 64);
        assert_eq!(Wal::replay(&path).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_restart() {
        let path = test_wal_path("torn_tail.wal");
        let first = {
            let store = WalStore::open(&path).unwrap();
            store.put(slot(1), None).await.unwrap()
        };
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[50, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let second = {
            let store = WalStore::open(&path).unwrap();
            assert_eq!(store.get(&first.id).await.unwrap(), Some(first.clone()));
            store.put(slot(2), None).await.unwrap()
        };

        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.get(&first.id).await.unwrap(), Some(first));
        assert_eq!(store.get(&second.id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn failed_write_is_invisible_now_and_after_restart() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let path = test_wal_path("failed_write.wal");
        let switch = Arc::new(AtomicBool::new(false));
        let (kept, lost, later) = {
            let store = WalStore::open_with_sync_fault(&path, switch.clone()).unwrap();
            let kept = store.put(slot(1), None).await.unwrap();

            switch.store(true, Ordering::SeqCst);
            let lost = slot(2);
            let err = store.put(lost.clone(), None).await.unwrap_err();
            assert!(matches!(err, StoreError::Wal(_)));
            assert!(store.get(&lost.id).await.unwrap().is_none());

            // A failed update leaves the stored copy and its version alone.
            let mut booked = kept.clone();
            booked.booked_by.push("ana".into());
            assert!(store.put(booked, Some(kept.version)).await.is_err());
            assert_eq!(store.get(&kept.id).await.unwrap(), Some(kept.clone()));

            switch.store(false, Ordering::SeqCst);
            let later = store.put(slot(3), None).await.unwrap();
            assert_eq!(store.appends_since_compact().await, 2);
            (kept, lost, later)
        };

        assert_eq!(Wal::replay(&path).unwrap().len(), 2);
        let store = WalStore::open(&path).unwrap();
        assert_eq!(store.get(&kept.id).await.unwrap(), Some(kept));
        assert!(store.get(&lost.id).await.unwrap().is_none());
        assert_eq!(store.get(&later.id).await.unwrap(), Some(later));
    }
}
