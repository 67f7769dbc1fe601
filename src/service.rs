use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::BookingEngine;
use crate::guard::CapacityGuard;
use crate::notify::NotifyHub;
use crate::preferences::PreferenceBook;
use crate::query::QueryService;
use crate::reaper;
use crate::store::{StoreError, WalStore};

/// One booking core over one WAL: store, guard, hub, engine, queries and
/// preferences, plus the background pruner and compactor.
pub struct Service {
    store: Arc<WalStore>,
    guard: Arc<CapacityGuard>,
    hub: Arc<NotifyHub>,
    engine: BookingEngine,
    queries: QueryService,
    preferences: PreferenceBook,
    maintenance: Vec<JoinHandle<()>>,
}

impl Service {
    /// Replay `config.wal_path()` and start serving. Must run inside a tokio runtime.
    pub fn open(config: &Config) -> io::Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: &Config, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let store = Arc::new(WalStore::open(&config.wal_path())?);
        let guard = Arc::new(CapacityGuard::new());
        let hub = Arc::new(NotifyHub::with_capacity(config.event_channel_capacity));
        let engine = BookingEngine::new(store.clone(), guard.clone(), clock, hub.clone());
        let queries = QueryService::new(store.clone());
        let preferences = PreferenceBook::new(store.clone());

        let pruner = tokio::spawn(reaper::run_pruner(
            guard.clone(),
            hub.clone(),
            config.prune_interval,
        ));
        let compactor = tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold));
        info!("service open on {}", config.wal_path().display());

        Ok(Self {
            store,
            guard,
            hub,
            engine,
            queries,
            preferences,
            maintenance: vec![pruner, compactor],
        })
    }

    pub fn engine(&self) -> &BookingEngine {
        &self.engine
    }

    pub fn queries(&self) -> &QueryService {
        &self.queries
    }

    pub fn preferences(&self) -> &PreferenceBook {
        &self.preferences
    }

    pub fn hub(&self) -> &Arc<NotifyHub> {
        &self.hub
    }

    pub fn guard(&self) -> &Arc<CapacityGuard> {
        &self.guard
    }

    pub fn store(&self) -> &Arc<WalStore> {
        &self.store
    }

    /// Stop background tasks and compact the WAL one last time.
    pub async fn shutdown(mut self) -> Result<(), StoreError> {
        for task in self.maintenance.drain(..) {
            task.abort();
        }
        self.store.compact().await?;
        info!("service stopped, WAL compacted");
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        for task in &self.maintenance {
            task.abort();
        }
    }
}
