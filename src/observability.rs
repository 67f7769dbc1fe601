use std::net::SocketAddr;
use std::time::Instant;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine/query operations. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "slotd_operations_total";

/// Histogram: operation latency in seconds, guard wait included. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "slotd_operation_duration_seconds";

/// Counter: seats successfully booked.
pub const SEATS_BOOKED_TOTAL: &str = "slotd_seats_booked_total";

/// Counter: domain events handed to the hub. Labels: kind.
pub const EVENTS_PUBLISHED_TOTAL: &str = "slotd_events_published_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for a timeslot's guard, in seconds.
pub const GUARD_WAIT_SECONDS: &str = "slotd_guard_wait_seconds";

/// Gauge: entries in the guard registry after the last prune.
pub const GUARD_ENTRIES: &str = "slotd_guard_entries";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an operation result to a short outcome label.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(EngineError::Validation(_)) => "validation_error",
        Err(EngineError::NotFound(_)) => "not_found",
        Err(EngineError::InvalidState { .. }) => "invalid_state",
        Err(EngineError::EventEnded(_)) => "event_ended",
        Err(EngineError::AlreadyBooked { .. }) => "already_booked",
        Err(EngineError::NotBooked { .. }) => "not_booked",
        Err(EngineError::Full { .. }) => "full",
        Err(EngineError::LimitExceeded(_)) => "limit_exceeded",
        Err(EngineError::Storage(_)) => "storage_error",
    }
}

/// Record count + latency for one finished operation.
pub fn record_operation<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result)).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn outcome_labels() {
        let ok: Result<(), EngineError> = Ok(());
        assert_eq!(outcome_label(&ok), "ok");
        let full: Result<(), EngineError> = Err(EngineError::Full { id: Ulid::nil(), capacity: 1 });
        assert_eq!(outcome_label(&full), "full");
        let gone: Result<(), EngineError> = Err(EngineError::NotFound(Ulid::nil()));
        assert_eq!(outcome_label(&gone), "not_found");
    }

    #[test]
    fn init_without_port_is_noop() {
        init(None);
    }
}
