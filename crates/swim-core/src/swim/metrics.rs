//! Metrics reported by the engine.
//!
//! The sink is handed to [`SwimInstance`](super::SwimInstance) once at
//! construction. Dead members are not a gauge: once dead they are removed and
//! tombstoned, so they show up in the dead counter and the tombstone gauge.
//!
//! Probe response times are reported by the engine from the clock the shell
//! feeds it. Message counts and sizes are only known to the shell, which
//! reports them through the same sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver for engine metrics. Every method defaults to doing nothing.
pub trait MetricsSink: Send + Sync {
    /// Current member counts, ourselves included.
    fn record_members(&self, _alive: usize, _suspect: usize, _unreachable: usize) {}

    /// A member was declared dead.
    fn increment_total_dead(&self) {}

    fn record_tombstones(&self, _count: usize) {}

    fn record_local_health_multiplier(&self, _value: u32) {}

    fn record_incarnation(&self, _incarnation: u64) {}

    fn increment_successful_probes(&self) {}

    fn increment_failed_probes(&self) {}

    /// An ack answered our direct ping after `elapsed_ms`.
    fn record_ping_round_trip(&self, _elapsed_ms: u64) {}

    /// A relay answered our ping-request after `elapsed_ms`, with an ack
    /// (`first_successful`) or a nack.
    fn record_ping_request_response(&self, _elapsed_ms: u64, _first_successful: bool) {}

    /// A datagram of `bytes` arrived.
    fn record_message_inbound(&self, _bytes: usize) {}

    /// A datagram of `bytes` was sent.
    fn record_message_outbound(&self, _bytes: usize) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

#[derive(Debug, Default)]
struct Counters {
    members_alive: AtomicU64,
    members_suspect: AtomicU64,
    members_unreachable: AtomicU64,
    total_dead: AtomicU64,
    tombstones: AtomicU64,
    local_health_multiplier: AtomicU64,
    incarnation: AtomicU64,
    successful_probes: AtomicU64,
    failed_probes: AtomicU64,
    ping_round_trips: AtomicU64,
    ping_round_trip_ms_total: AtomicU64,
    ping_request_responses: AtomicU64,
    ping_request_first_successful: AtomicU64,
    ping_request_first_successful_ms_total: AtomicU64,
    messages_inbound: AtomicU64,
    bytes_inbound: AtomicU64,
    messages_outbound: AtomicU64,
    bytes_outbound: AtomicU64,
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub members_alive: u64,
    pub members_suspect: u64,
    pub members_unreachable: u64,
    pub total_dead: u64,
    pub tombstones: u64,
    pub local_health_multiplier: u64,
    pub incarnation: u64,
    pub successful_probes: u64,
    pub failed_probes: u64,
    pub ping_round_trips: u64,
    /// Sum of all ping round trips, for averaging
    pub ping_round_trip_ms_total: u64,
    /// Acks and nacks received for our ping-requests
    pub ping_request_responses: u64,
    pub ping_request_first_successful: u64,
    pub ping_request_first_successful_ms_total: u64,
    pub messages_inbound: u64,
    pub bytes_inbound: u64,
    pub messages_outbound: u64,
    pub bytes_outbound: u64,
}

impl MetricsSnapshot {
    /// Mean direct ping round trip, if any was recorded.
    pub fn mean_ping_round_trip_ms(&self) -> Option<u64> {
        (self.ping_round_trips > 0).then(|| self.ping_round_trip_ms_total / self.ping_round_trips)
    }
}

/// Atomics-backed sink. Clones share the same counters, so one clone can be
/// given to the engine and another kept for reading.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetrics {
    inner: Arc<Counters>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.inner;
        MetricsSnapshot {
            members_alive: c.members_alive.load(Ordering::Relaxed),
            members_suspect: c.members_suspect.load(Ordering::Relaxed),
            members_unreachable: c.members_unreachable.load(Ordering::Relaxed),
            total_dead: c.total_dead.load(Ordering::Relaxed),
            tombstones: c.tombstones.load(Ordering::Relaxed),
            local_health_multiplier: c.local_health_multiplier.load(Ordering::Relaxed),
            incarnation: c.incarnation.load(Ordering::Relaxed),
            successful_probes: c.successful_probes.load(Ordering::Relaxed),
            failed_probes: c.failed_probes.load(Ordering::Relaxed),
            ping_round_trips: c.ping_round_trips.load(Ordering::Relaxed),
            ping_round_trip_ms_total: c.ping_round_trip_ms_total.load(Ordering::Relaxed),
            ping_request_responses: c.ping_request_responses.load(Ordering::Relaxed),
            ping_request_first_successful: c.ping_request_first_successful.load(Ordering::Relaxed),
            ping_request_first_successful_ms_total: c
                .ping_request_first_successful_ms_total
                .load(Ordering::Relaxed),
            messages_inbound: c.messages_inbound.load(Ordering::Relaxed),
            bytes_inbound: c.bytes_inbound.load(Ordering::Relaxed),
            messages_outbound: c.messages_outbound.load(Ordering::Relaxed),
            bytes_outbound: c.bytes_outbound.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_members(&self, alive: usize, suspect: usize, unreachable: usize) {
        let c = &self.inner;
        c.members_alive.store(alive as u64, Ordering::Relaxed);
        c.members_suspect.store(suspect as u64, Ordering::Relaxed);
        c.members_unreachable.store(unreachable as u64, Ordering::Relaxed);
    }

    fn increment_total_dead(&self) {
        self.inner.total_dead.fetch_add(1, Ordering::Relaxed);
    }

    fn record_tombstones(&self, count: usize) {
        self.inner.tombstones.store(count as u64, Ordering::Relaxed);
    }

    fn record_local_health_multiplier(&self, value: u32) {
        self.inner
            .local_health_multiplier
            .store(u64::from(value), Ordering::Relaxed);
    }

    fn record_incarnation(&self, incarnation: u64) {
        self.inner.incarnation.store(incarnation, Ordering::Relaxed);
    }

    fn increment_successful_probes(&self) {
        self.inner.successful_probes.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_failed_probes(&self) {
        self.inner.failed_probes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_ping_round_trip(&self, elapsed_ms: u64) {
        let c = &self.inner;
        c.ping_round_trips.fetch_add(1, Ordering::Relaxed);
        c.ping_round_trip_ms_total.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    fn record_ping_request_response(&self, elapsed_ms: u64, first_successful: bool) {
        let c = &self.inner;
        c.ping_request_responses.fetch_add(1, Ordering::Relaxed);
        if first_successful {
            c.ping_request_first_successful.fetch_add(1, Ordering::Relaxed);
            c.ping_request_first_successful_ms_total
                .fetch_add(elapsed_ms, Ordering::Relaxed);
        }
    }

    fn record_message_inbound(&self, bytes: usize) {
        let c = &self.inner;
        c.messages_inbound.fetch_add(1, Ordering::Relaxed);
        c.bytes_inbound.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_message_outbound(&self, bytes: usize) {
        let c = &self.inner;
        c.messages_outbound.fetch_add(1, Ordering::Relaxed);
        c.bytes_outbound.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}
