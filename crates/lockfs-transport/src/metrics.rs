//! Per-client RPC counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Events counted by an [`RpcClient`](crate::rpc::RpcClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// A request or one-way frame left this client.
    RequestsSent = 0,
    /// A response, successful or not, came back.
    ResponsesReceived,
    /// A response carried the ERROR flag.
    Errors,
    /// No response arrived within the call's limit.
    Timeouts,
    /// The client finished dialing its peer.
    ConnectionsOpened,
}

const COUNTERS: usize = 5;

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`Counter::RequestsSent`].
    pub requests_sent: u64,
    /// See [`Counter::ResponsesReceived`].
    pub responses_received: u64,
    /// See [`Counter::Errors`].
    pub errors: u64,
    /// See [`Counter::Timeouts`].
    pub timeouts: u64,
    /// See [`Counter::ConnectionsOpened`].
    pub connections_opened: u64,
}

impl MetricsSnapshot {
    /// Requests that have neither been answered nor timed out.
    pub fn unanswered(&self) -> u64 {
        self.requests_sent
            .saturating_sub(self.responses_received + self.timeouts)
    }
}

/// Lock-free counter table.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    counts: [AtomicU64; COUNTERS],
}

impl TransportMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump `counter` by one.
    pub fn record(&self, counter: Counter) {
        self.counts[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of `counter`.
    pub fn get(&self, counter: Counter) -> u64 {
        self.counts[counter as usize].load(Ordering::Relaxed)
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_sent: self.get(Counter::RequestsSent),
            responses_received: self.get(Counter::ResponsesReceived),
            errors: self.get(Counter::Errors),
            timeouts: self.get(Counter::Timeouts),
            connections_opened: self.get(Counter::ConnectionsOpened),
        }
    }
}
