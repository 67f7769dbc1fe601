use std::path::PathBuf;
use std::time::Duration;

use crate::notify::DEFAULT_CHANNEL_CAPACITY;

/// Process configuration, read once at startup from `SLOTD_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub prune_interval: Duration,
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            prune_interval: Duration::from_secs(60),
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("SLOTD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: lookup("SLOTD_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("SLOTD_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            prune_interval: lookup("SLOTD_PRUNE_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.prune_interval),
            event_channel_capacity: lookup("SLOTD_EVENT_CHANNEL_CAPACITY")
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotd.wal")
    }
}
