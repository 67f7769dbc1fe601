use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::DomainEvent;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Receives domain events once the state change behind them is durable.
/// Delivery and retry are the sink's business; `publish` must not block.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &DomainEvent);

    /// The slot was hard-deleted; no further events will name it.
    fn slot_removed(&self, _slot_id: Ulid) {}
}

/// Broadcast hub: one channel per timeslot plus a firehose of everything.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<DomainEvent>>,
    all: broadcast::Sender<DomainEvent>,
    capacity: usize,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(capacity).0,
            capacity,
        }
    }

    /// Subscribe to events for one timeslot. Creates the channel if needed.
    pub fn subscribe(&self, slot_id: Ulid) -> broadcast::Receiver<DomainEvent> {
        let sender = self
            .channels
            .entry(slot_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        sender.subscribe()
    }

    /// Subscribe to events for every timeslot.
    pub fn subscribe_all(&self) -> broadcast::Receiver<DomainEvent> {
        self.all.subscribe()
    }

    /// Drop a slot's channel. Its receivers see the channel close.
    pub fn remove(&self, slot_id: &Ulid) {
        self.channels.remove(slot_id);
    }

    /// Drop per-slot channels whose receivers are all gone. Returns how many
    /// were dropped.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    /// Number of per-slot channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl NotificationSink for NotifyHub {
    /// No-op for channels nobody listens on.
    fn publish(&self, event: &DomainEvent) {
        metrics::counter!(crate::observability::EVENTS_PUBLISHED_TOTAL, "kind" => event.kind())
            .increment(1);
        if let Some(sender) = self.channels.get(&event.slot_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }

    fn slot_removed(&self, slot_id: Ulid) {
        self.remove(&slot_id);
    }
}
