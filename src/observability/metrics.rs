//! Thread-safe client metrics
//!
//! Atomic counters for traffic and connection lifecycle. Each client owns one
//! collector and shares it with its event sink, so the receive path on the
//! I/O context can count without touching control-loop state.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-client metrics collector
#[derive(Debug, Default)]
pub struct ClientMetrics {
    // Traffic (incremented from the I/O context)
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,

    // Traffic (incremented on the control loop)
    /// Messages that matched at least one filter
    messages_dispatched: AtomicU64,
    callback_failures: AtomicU64,
    publications_sent: AtomicU64,
    publications_buffered: AtomicU64,
    subscriptions_sent: AtomicU64,
    subscriptions_buffered: AtomicU64,
    operation_failures: AtomicU64,

    // Connection lifecycle
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
}

/// Point-in-time copy of [`ClientMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub messages_dispatched: u64,
    pub callback_failures: u64,
    pub publications_sent: u64,
    pub publications_buffered: u64,
    pub subscriptions_sent: u64,
    pub subscriptions_buffered: u64,
    pub operation_failures: u64,
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_failed(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publication_sent(&self) {
        self.publications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publication_buffered(&self) {
        self.publications_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_sent(&self) {
        self.subscriptions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_buffered(&self) {
        self.subscriptions_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_failed(&self) {
        self.operation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Total messages rejected by a full queue
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            publications_sent: self.publications_sent.load(Ordering::Relaxed),
            publications_buffered: self.publications_buffered.load(Ordering::Relaxed),
            subscriptions_sent: self.subscriptions_sent.load(Ordering::Relaxed),
            subscriptions_buffered: self.subscriptions_buffered.load(Ordering::Relaxed),
            operation_failures: self.operation_failures.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
        }
    }
}
