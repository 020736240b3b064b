//! Caching client counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of client counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientStatsSnapshot {
    /// `acquire` RPCs sent to the server.
    pub acquire_rpcs: u64,
    /// `release` RPCs sent to the server.
    pub release_rpcs: u64,
    /// Local acquires satisfied from a cached grant.
    pub cache_hits: u64,
    /// Revoke callbacks received.
    pub revokes_received: u64,
    /// Retry callbacks received.
    pub retries_received: u64,
}

impl ClientStatsSnapshot {
    /// Total RPCs this client has sent to the server.
    pub fn rpcs(&self) -> u64 {
        self.acquire_rpcs + self.release_rpcs
    }
}

/// Thread-safe client counters.
#[derive(Debug, Default)]
pub struct ClientStats {
    acquire_rpcs: AtomicU64,
    release_rpcs: AtomicU64,
    cache_hits: AtomicU64,
    revokes_received: AtomicU64,
    retries_received: AtomicU64,
}

impl ClientStats {
    pub(crate) fn inc_acquire_rpcs(&self) {
        self.acquire_rpcs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_release_rpcs(&self) {
        self.release_rpcs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_revokes_received(&self) {
        self.revokes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retries_received(&self) {
        self.retries_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            acquire_rpcs: self.acquire_rpcs.load(Ordering::Relaxed),
            release_rpcs: self.release_rpcs.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            revokes_received: self.revokes_received.load(Ordering::Relaxed),
            retries_received: self.retries_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = ClientStats::default();
        stats.inc_acquire_rpcs();
        stats.inc_release_rpcs();
        stats.inc_cache_hits();
        stats.inc_cache_hits();
        let snap = stats.snapshot();
        assert_eq!(snap.rpcs(), 2);
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.revokes_received, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&ClientStats::default().snapshot()).unwrap();
        assert!(json.contains("\"cache_hits\":0"));
    }
}
