//! Caching lock server.
//!
//! Clients keep a granted lock after their local users are done with it.
//! When another client asks for a held lock the requester is queued FIFO and
//! the current owner is sent a revoke; when the owner releases, ownership
//! moves straight to the head of the queue and that client is sent a retry.
//!
//! Callbacks are delivered from spawned tasks, so `acquire` and `release`
//! never wait on a client. At most one revoke is outstanding per lock per
//! ownership epoch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::callback::CallbackSink;
use crate::error::{LockError, Result};
use crate::rpc::LockReply;
use crate::service::LockService;
use crate::types::{ClientId, LockId, LockStatus};

#[derive(Debug, Default)]
struct LockRecord {
    /// Current holder; `None` means free.
    owner: Option<ClientId>,
    /// Requesters in arrival order. Never contains `owner`.
    waiters: VecDeque<ClientId>,
    /// A revoke has been sent to `owner` and not yet answered by a release.
    revoke_outstanding: bool,
}

/// Point-in-time view of one lock's server-side record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRecordSnapshot {
    /// Some client owns the lock.
    pub held: bool,
    /// The owning client.
    pub owner: Option<ClientId>,
    /// Queued requesters, head first.
    pub waiters: Vec<ClientId>,
}

#[derive(Debug, Clone)]
enum Callback {
    Revoke(ClientId),
    Retry(ClientId),
}

/// Lock server for caching clients.
///
/// Must be driven from within a Tokio runtime; callbacks are spawned onto it.
pub struct CachingLockServer {
    locks: Arc<DashMap<LockId, LockRecord>>,
    callbacks: Arc<dyn CallbackSink>,
    grants: AtomicU64,
}

impl CachingLockServer {
    /// Create a server that reaches clients through `callbacks`.
    pub fn new(callbacks: Arc<dyn CallbackSink>) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            callbacks,
            grants: AtomicU64::new(0),
        }
    }

    /// Grant `lock_id` to `client_id` or queue the client and revoke the owner.
    pub fn acquire(&self, lock_id: LockId, client_id: &ClientId) -> LockStatus {
        let revoke_target = {
            let mut record = self.locks.entry(lock_id).or_default();
            match &record.owner {
                None => {
                    record.owner = Some(client_id.clone());
                    self.grants.fetch_add(1, Ordering::Relaxed);
                    debug!(%lock_id, client = %client_id, "granted free lock");
                    return LockStatus::Granted;
                }
                Some(owner) if owner == client_id => {
                    debug!(%lock_id, client = %client_id, "client already owns lock");
                    return LockStatus::Granted;
                }
                Some(_) => {}
            }
            if record.waiters.contains(client_id) {
                debug!(%lock_id, client = %client_id, "client already queued");
                return LockStatus::Retry;
            }
            record.waiters.push_back(client_id.clone());
            debug!(%lock_id, client = %client_id, queued = record.waiters.len(), "client queued");
            if record.revoke_outstanding {
                None
            } else {
                record.revoke_outstanding = true;
                record.owner.clone()
            }
        };

        if let Some(owner) = revoke_target {
            self.dispatch(lock_id, vec![Callback::Revoke(owner)]);
        }
        LockStatus::Retry
    }

    /// Accept `lock_id` back from `client_id`, handing it to the next waiter.
    ///
    /// A release from a client that is not the recorded owner is a no-op.
    pub fn release(&self, lock_id: LockId, client_id: &ClientId) -> Result<()> {
        let callbacks = {
            let mut record = self
                .locks
                .get_mut(&lock_id)
                .ok_or(LockError::NoSuchLock(lock_id))?;
            if record.owner.as_ref() != Some(client_id) {
                debug!(%lock_id, client = %client_id, "release from non-owner ignored");
                return Ok(());
            }
            match record.waiters.pop_front() {
                None => {
                    record.owner = None;
                    record.revoke_outstanding = false;
                    debug!(%lock_id, client = %client_id, "lock now free");
                    Vec::new()
                }
                Some(next) => {
                    record.owner = Some(next.clone());
                    self.grants.fetch_add(1, Ordering::Relaxed);
                    debug!(%lock_id, from = %client_id, to = %next, "ownership transferred");
                    let mut callbacks = vec![Callback::Retry(next.clone())];
                    // Others still queued: the new owner must give it back after use.
                    record.revoke_outstanding = !record.waiters.is_empty();
                    if record.revoke_outstanding {
                        callbacks.push(Callback::Revoke(next));
                    }
                    callbacks
                }
            }
        };
        self.dispatch(lock_id, callbacks);
        Ok(())
    }

    /// Number of grants and ownership transfers so far.
    pub fn stat(&self, lock_id: LockId) -> u64 {
        let grants = self.grants.load(Ordering::Relaxed);
        debug!(%lock_id, grants, "stat");
        grants
    }

    /// Current record for `lock_id`, if the server has seen it.
    pub fn record(&self, lock_id: LockId) -> Option<LockRecordSnapshot> {
        self.locks.get(&lock_id).map(|record| LockRecordSnapshot {
            held: record.owner.is_some(),
            owner: record.owner.clone(),
            waiters: record.waiters.iter().cloned().collect(),
        })
    }

    /// Deliver `callbacks` in order from one background task.
    fn dispatch(&self, lock_id: LockId, callbacks: Vec<Callback>) {
        if callbacks.is_empty() {
            return;
        }
        let sink = self.callbacks.clone();
        let locks = self.locks.clone();
        tokio::spawn(async move {
            for callback in callbacks {
                match callback {
                    Callback::Retry(client) => {
                        if let Err(e) = sink.retry(&client, lock_id).await {
                            warn!(%lock_id, %client, error = %e, "retry callback failed");
                        }
                    }
                    Callback::Revoke(client) => {
                        if let Err(e) = sink.revoke(&client, lock_id).await {
                            warn!(%lock_id, %client, error = %e, "revoke callback failed");
                            if let Some(mut record) = locks.get_mut(&lock_id) {
                                if record.owner.as_ref() == Some(&client) {
                                    record.revoke_outstanding = false;
                                }
                            }
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl LockService for CachingLockServer {
    async fn acquire(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply> {
        Ok(CachingLockServer::acquire(self, lock_id, client_id).into())
    }

    async fn release(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply> {
        match CachingLockServer::release(self, lock_id, client_id) {
            Ok(()) => Ok(LockReply::Released),
            Err(LockError::NoSuchLock(id)) => Ok(LockReply::NoSuchLock(id)),
            Err(e) => Err(e),
        }
    }

    async fn stat(&self, lock_id: LockId) -> Result<u64> {
        Ok(CachingLockServer::stat(self, lock_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Revoke(ClientId, LockId),
        Retry(ClientId, LockId),
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Sent>>,
        fail_revokes: bool,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        async fn wait_for(&self, n: usize) -> Vec<Sent> {
            for _ in 0..200 {
                if self.sent.lock().unwrap().len() >= n {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            // Let any stray extra callbacks land before the caller inspects.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.sent()
        }
    }

    #[async_trait]
    impl CallbackSink for RecordingSink {
        async fn revoke(&self, client: &ClientId, lock_id: LockId) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Revoke(client.clone(), lock_id));
            if self.fail_revokes {
                return Err(LockError::Transport(lockfs_transport::TransportError::ConnectionReset));
            }
            Ok(())
        }

        async fn retry(&self, client: &ClientId, lock_id: LockId) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Retry(client.clone(), lock_id));
            Ok(())
        }
    }

    fn client(name: &str) -> ClientId {
        ClientId::new(name)
    }

    fn setup() -> (CachingLockServer, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (CachingLockServer::new(sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_free_lock_granted() {
        let (server, sink) = setup();
        let lock = LockId::new(7);
        assert_eq!(server.acquire(lock, &client("a")), LockStatus::Granted);
        let record = server.record(lock).unwrap();
        assert!(record.held);
        assert_eq!(record.owner, Some(client("a")));
        assert!(record.waiters.is_empty());
        assert_eq!(server.stat(lock), 1);
        assert!(sink.wait_for(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_owner_reacquire_is_idempotent() {
        let (server, sink) = setup();
        let lock = LockId::new(7);
        server.acquire(lock, &client("a"));
        assert_eq!(server.acquire(lock, &client("b")), LockStatus::Retry);
        assert_eq!(server.acquire(lock, &client("a")), LockStatus::Granted);
        assert_eq!(server.record(lock).unwrap().waiters, vec![client("b")]);
        assert_eq!(sink.wait_for(1).await, vec![Sent::Revoke(client("a"), lock)]);
    }

    #[tokio::test]
    async fn test_contention_queues_and_revokes_once() {
        let (server, sink) = setup();
        let lock = LockId::new(7);
        server.acquire(lock, &client("a"));
        assert_eq!(server.acquire(lock, &client("b")), LockStatus::Retry);
        assert_eq!(server.acquire(lock, &client("b")), LockStatus::Retry);
        assert_eq!(server.acquire(lock, &client("c")), LockStatus::Retry);

        let record = server.record(lock).unwrap();
        assert_eq!(record.owner, Some(client("a")));
        assert_eq!(record.waiters, vec![client("b"), client("c")]);
        assert_eq!(sink.wait_for(1).await, vec![Sent::Revoke(client("a"), lock)]);
    }

    #[tokio::test]
    async fn test_release_transfers_to_head() {
        let (server, sink) = setup();
        let lock = LockId::new(7);
        server.acquire(lock, &client("a"));
        server.acquire(lock, &client("b"));
        sink.wait_for(1).await;

        server.release(lock, &client("a")).unwrap();
        let record = server.record(lock).unwrap();
        assert!(record.held);
        assert_eq!(record.owner, Some(client("b")));
        assert!(record.waiters.is_empty());
        assert_eq!(
            sink.wait_for(2).await,
            vec![Sent::Revoke(client("a"), lock), Sent::Retry(client("b"), lock)]
        );
        assert_eq!(server.stat(lock), 2);
    }

    #[tokio::test]
    async fn test_transfer_with_more_waiters_revokes_new_owner() {
        let (server, sink) = setup();
        let lock = LockId::new(7);
        server.acquire(lock, &client("a"));
        server.acquire(lock, &client("b"));
        server.acquire(lock, &client("c"));
        sink.wait_for(1).await;

        server.release(lock, &client("a")).unwrap();
        assert_eq!(
            sink.wait_for(3).await,
            vec![
                Sent::Revoke(client("a"), lock),
                Sent::Retry(client("b"), lock),
                Sent::Revoke(client("b"), lock),
            ]
        );

        server.release(lock, &client("b")).unwrap();
        let sent = sink.wait_for(4).await;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3], Sent::Retry(client("c"), lock));
        assert_eq!(server.record(lock).unwrap().owner, Some(client("c")));
    }

    #[tokio::test]
    async fn test_last_release_frees_lock() {
        let (server, _sink) = setup();
        let lock = LockId::new(2);
        server.acquire(lock, &client("a"));
        server.release(lock, &client("a")).unwrap();
        let record = server.record(lock).unwrap();
        assert!(!record.held);
        assert_eq!(record.owner, None);
        assert_eq!(server.acquire(lock, &client("b")), LockStatus::Granted);
    }

    #[tokio::test]
    async fn test_release_from_non_owner_is_noop() {
        let (server, _sink) = setup();
        let lock = LockId::new(2);
        server.acquire(lock, &client("a"));
        server.acquire(lock, &client("b"));
        server.release(lock, &client("b")).unwrap();
        let record = server.record(lock).unwrap();
        assert_eq!(record.owner, Some(client("a")));
        assert_eq!(record.waiters, vec![client("b")]);
    }

    #[tokio::test]
    async fn test_release_unknown_lock() {
        let (server, _sink) = setup();
        assert!(matches!(
            server.release(LockId::new(404), &client("a")),
            Err(LockError::NoSuchLock(id)) if id == LockId::new(404)
        ));
        let reply = LockService::release(&server, LockId::new(404), &client("a")).await.unwrap();
        assert_eq!(reply, LockReply::NoSuchLock(LockId::new(404)));
    }

    #[tokio::test]
    async fn test_bitmap_lock_retry_goes_to_queue_head() {
        let (server, sink) = setup();
        let lock = LockId::BLOCK_BITMAP;
        server.acquire(lock, &client("d"));
        for name in ["a", "b", "c"] {
            assert_eq!(server.acquire(lock, &client(name)), LockStatus::Retry);
        }
        sink.wait_for(1).await;

        server.release(lock, &client("d")).unwrap();
        let sent = sink.wait_for(3).await;
        let retries: Vec<_> = sent
            .iter()
            .filter(|s| matches!(s, Sent::Retry(..)))
            .collect();
        assert_eq!(retries, vec![&Sent::Retry(client("a"), lock)]);
        assert_eq!(server.record(lock).unwrap().waiters, vec![client("b"), client("c")]);
    }

    #[tokio::test]
    async fn test_failed_revoke_can_be_reissued() {
        let sink = Arc::new(RecordingSink {
            fail_revokes: true,
            ..Default::default()
        });
        let server = CachingLockServer::new(sink.clone());
        let lock = LockId::new(11);
        server.acquire(lock, &client("a"));
        server.acquire(lock, &client("b"));
        sink.wait_for(1).await;

        server.acquire(lock, &client("c"));
        assert_eq!(
            sink.wait_for(2).await,
            vec![Sent::Revoke(client("a"), lock), Sent::Revoke(client("a"), lock)]
        );
    }
}
