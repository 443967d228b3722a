//! Observability and Metrics
//!
//! Process-wide counters for session health: connections, handshakes,
//! packet flow, liveness and event-bus activity.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Handshakes started (login sent or received)
    pub handshakes_total: AtomicU64,
    /// Handshakes that reached the playing phase
    pub handshakes_success: AtomicU64,
    /// Handshakes ended by rejection or protocol violation
    pub handshakes_failed: AtomicU64,
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    /// Packets discarded because their phase had not been reached
    pub packets_dropped: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    /// Teardowns caused by a fatal error
    pub fatal_teardowns: AtomicU64,
    pub heartbeats_received: AtomicU64,
    /// Peers declared dead by the liveness check
    pub liveness_timeouts: AtomicU64,
    /// Entity and chunk resync requests emitted
    pub resync_requests: AtomicU64,
    /// Client predictions overwritten by the server
    pub corrections: AtomicU64,
    pub events_dispatched: AtomicU64,
    pub listener_deliveries: AtomicU64,
    pub listener_panics: AtomicU64,
    /// Weak listeners found dead and removed
    pub listeners_reaped: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            handshakes_total: AtomicU64::new(0),
            handshakes_success: AtomicU64::new(0),
            handshakes_failed: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            fatal_teardowns: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
            liveness_timeouts: AtomicU64::new(0),
            resync_requests: AtomicU64::new(0),
            corrections: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            listener_deliveries: AtomicU64::new(0),
            listener_panics: AtomicU64::new(0),
            listeners_reaped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate so a stray close never wraps the gauge
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn handshake_attempt(&self) {
        self.handshakes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_success(&self) {
        self.handshakes_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_sent(&self, byte_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_received(&self, byte_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fatal_teardown(&self) {
        self.fatal_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn liveness_timeout(&self) {
        self.liveness_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resync_request(&self) {
        self.resync_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correction(&self) {
        self.corrections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_delivery(&self) {
        self.listener_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_panic(&self) {
        self.listener_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listeners_reaped(&self, count: u64) {
        self.listeners_reaped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            handshakes_total: self.handshakes_total.load(Ordering::Relaxed),
            handshakes_success: self.handshakes_success.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            fatal_teardowns: self.fatal_teardowns.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            liveness_timeouts: self.liveness_timeouts.load(Ordering::Relaxed),
            resync_requests: self.resync_requests.load(Ordering::Relaxed),
            corrections: self.corrections.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            listener_deliveries: self.listener_deliveries.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            listeners_reaped: self.listeners_reaped.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            handshakes_total = snapshot.handshakes_total,
            handshakes_success = snapshot.handshakes_success,
            handshakes_failed = snapshot.handshakes_failed,
            packets_sent = snapshot.packets_sent,
            packets_received = snapshot.packets_received,
            packets_dropped = snapshot.packets_dropped,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            fatal_teardowns = snapshot.fatal_teardowns,
            heartbeats_received = snapshot.heartbeats_received,
            liveness_timeouts = snapshot.liveness_timeouts,
            resync_requests = snapshot.resync_requests,
            corrections = snapshot.corrections,
            events_dispatched = snapshot.events_dispatched,
            listener_deliveries = snapshot.listener_deliveries,
            listener_panics = snapshot.listener_panics,
            listeners_reaped = snapshot.listeners_reaped,
            uptime_seconds = snapshot.uptime_seconds,
            "Session metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub handshakes_total: u64,
    pub handshakes_success: u64,
    pub handshakes_failed: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub fatal_teardowns: u64,
    pub heartbeats_received: u64,
    pub liveness_timeouts: u64,
    pub resync_requests: u64,
    pub corrections: u64,
    pub events_dispatched: u64,
    pub listener_deliveries: u64,
    pub listener_panics: u64,
    pub listeners_reaped: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Logs operation duration when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_gauge_saturates() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_closed();
        metrics.connection_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 1);
        assert_eq!(snapshot.connections_active, 0);
    }
}
