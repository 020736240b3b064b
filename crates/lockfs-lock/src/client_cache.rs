//! Caching lock client.
//!
//! A granted lock stays with the client after local users release it, so a
//! run of local acquire/release pairs costs one server round trip. The
//! server takes the lock back with a revoke callback; a client that was
//! queued learns it owns the lock from a retry callback.
//!
//! Each lock id has its own record and wait channel. The record mutex is
//! never held across a server call: callbacks arriving during that call
//! need it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use lockfs_transport::{RpcServer, TransportError};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callback::CallbackHandler;
use crate::config::ClientConfig;
use crate::error::{LockError, Result};
use crate::hook::ReleaseHook;
use crate::rpc::LockReply;
use crate::service::{LockService, RemoteLockService};
use crate::stats::{ClientStats, ClientStatsSnapshot};
use crate::types::{ClientId, LockId, LockState};

#[derive(Debug)]
struct LockRecord {
    state: LockState,
    /// Local callers inside `acquire()` that have not returned yet.
    local_waiters: usize,
    revoke_pending: bool,
    retry_signal: bool,
}

impl Default for LockRecord {
    fn default() -> Self {
        Self {
            state: LockState::Idle,
            local_waiters: 0,
            revoke_pending: false,
            retry_signal: false,
        }
    }
}

#[derive(Default)]
struct LockSlot {
    record: Mutex<LockRecord>,
    changed: Notify,
}

impl LockSlot {
    fn record(&self) -> MutexGuard<'_, LockRecord> {
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lock client that caches grants between local uses.
pub struct CachingLockClient {
    id: ClientId,
    server: Arc<dyn LockService>,
    hook: Option<Arc<dyn ReleaseHook>>,
    release_threshold: usize,
    locks: DashMap<LockId, Arc<LockSlot>>,
    stats: ClientStats,
    callback_task: Mutex<Option<JoinHandle<()>>>,
}

impl CachingLockClient {
    /// Build a client that talks to `server` and is known to it as `id`.
    ///
    /// Callbacks addressed to `id` must be routed to [`revoke_handler`] and
    /// [`retry_handler`] by the caller; [`connect`] wires this up over TCP.
    ///
    /// [`revoke_handler`]: CachingLockClient::revoke_handler
    /// [`retry_handler`]: CachingLockClient::retry_handler
    /// [`connect`]: CachingLockClient::connect
    pub fn new(
        id: ClientId,
        server: Arc<dyn LockService>,
        hook: Option<Arc<dyn ReleaseHook>>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            id,
            server,
            hook,
            // Zero would leave a revoked lock cached forever.
            release_threshold: config.release_threshold.max(1),
            locks: DashMap::new(),
            stats: ClientStats::default(),
            callback_task: Mutex::new(None),
        }
    }

    /// Start a callback endpoint on `config.callback_bind` and connect to
    /// the lock server at `config.server_addr`.
    ///
    /// The client's id is the endpoint's bound address.
    pub async fn connect(
        config: &ClientConfig,
        hook: Option<Arc<dyn ReleaseHook>>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(&config.callback_bind)
            .await
            .map_err(TransportError::from)?;
        let id = ClientId::from(listener.local_addr().map_err(TransportError::from)?);
        let server = RemoteLockService::connect(&config.server_addr, config.rpc_config()).await?;

        let client = Arc::new(Self::new(id, Arc::new(server), hook, config));
        let task = RpcServer::spawn(listener, Arc::new(CallbackHandler::new(&client)));
        *client.callback_task() = Some(task);
        info!(client = %client.id, server = %config.server_addr, "lock client connected");
        Ok(client)
    }

    /// This client's callback address.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Stop the callback endpoint. Cached locks are not returned.
    pub fn shutdown(&self) {
        if let Some(task) = self.callback_task().take() {
            task.abort();
            debug!(client = %self.id, "callback endpoint stopped");
        }
    }

    /// Local state of `lock_id`, or `None` if this client never touched it.
    pub fn state(&self, lock_id: LockId) -> Option<LockState> {
        self.locks.get(&lock_id).map(|slot| slot.record().state)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ClientStatsSnapshot {
        self.stats.snapshot()
    }

    fn callback_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.callback_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, lock_id: LockId) -> Arc<LockSlot> {
        self.locks.entry(lock_id).or_default().value().clone()
    }

    /// Wait until this process holds `lock_id`.
    ///
    /// Served from the cached grant when there is one; otherwise asks the
    /// server and, if queued, waits for the retry callback.
    pub async fn acquire(&self, lock_id: LockId) -> Result<()> {
        let slot = self.slot(lock_id);
        slot.record().local_waiters += 1;

        loop {
            let changed = slot.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            {
                let mut record = slot.record();
                if !record.state.blocks_acquire() {
                    if record.state == LockState::CachedFree {
                        record.state = LockState::Held;
                        record.local_waiters -= 1;
                        self.stats.inc_cache_hits();
                        debug!(%lock_id, client = %self.id, "acquired from cache");
                        return Ok(());
                    }
                    record.state = LockState::Acquiring;
                    // A retry seen while idle is stale. A revoke is not: the
                    // server may already count us as owner with others queued.
                    record.retry_signal = false;
                    break;
                }
            }
            changed.await;
        }

        let result = self.acquire_from_server(lock_id, &slot).await;
        let mut record = slot.record();
        record.local_waiters -= 1;
        match result {
            Ok(()) => {
                record.state = LockState::Held;
                debug!(%lock_id, client = %self.id, "acquired from server");
                Ok(())
            }
            Err(e) => {
                record.state = LockState::Idle;
                slot.changed.notify_waiters();
                warn!(%lock_id, client = %self.id, error = %e, "server acquire failed");
                Err(e)
            }
        }
    }

    async fn acquire_from_server(&self, lock_id: LockId, slot: &LockSlot) -> Result<()> {
        self.stats.inc_acquire_rpcs();
        match self.server.acquire(lock_id, &self.id).await? {
            LockReply::Granted => Ok(()),
            LockReply::Retry => {
                debug!(%lock_id, client = %self.id, "queued, waiting for retry");
                loop {
                    let changed = slot.changed.notified();
                    tokio::pin!(changed);
                    changed.as_mut().enable();
                    let signalled = slot.record().retry_signal;
                    if signalled {
                        return Ok(());
                    }
                    changed.await;
                }
            }
            other => Err(LockError::UnexpectedReply {
                op: "acquire",
                reply: format!("{:?}", other),
            }),
        }
    }

    /// Give up the local hold on `lock_id`.
    ///
    /// The grant stays cached unless the server asked for it back and no
    /// other local caller is waiting, in which case it is returned now.
    pub async fn release(&self, lock_id: LockId) -> Result<()> {
        let slot = self
            .locks
            .get(&lock_id)
            .map(|slot| slot.value().clone())
            .ok_or(LockError::NoSuchLock(lock_id))?;
        {
            let mut record = slot.record();
            if record.state != LockState::Held {
                return Err(LockError::NotHeld(lock_id));
            }
            if !(record.revoke_pending && record.local_waiters < self.release_threshold) {
                record.state = LockState::CachedFree;
                slot.changed.notify_waiters();
                debug!(%lock_id, client = %self.id, waiters = record.local_waiters, "release cached");
                return Ok(());
            }
            record.state = LockState::Releasing;
        }
        self.return_to_server(lock_id, &slot).await
    }

    /// Server asks for `lock_id` back.
    ///
    /// An unused cached grant is returned before this resolves; otherwise
    /// the request is remembered and honored by a later local release.
    pub async fn revoke_handler(&self, lock_id: LockId) -> Result<()> {
        self.stats.inc_revokes_received();
        let slot = self.slot(lock_id);
        {
            let mut record = slot.record();
            match record.state {
                LockState::CachedFree => record.state = LockState::Releasing,
                LockState::Releasing => {
                    debug!(%lock_id, client = %self.id, "revoke while already releasing");
                    return Ok(());
                }
                state => {
                    record.revoke_pending = true;
                    debug!(%lock_id, client = %self.id, %state, "revoke deferred");
                    return Ok(());
                }
            }
        }
        self.return_to_server(lock_id, &slot).await
    }

    /// Server says this client now owns `lock_id`. Duplicates are ignored.
    pub fn retry_handler(&self, lock_id: LockId) {
        self.stats.inc_retries_received();
        let slot = self.slot(lock_id);
        let mut record = slot.record();
        if record.state != LockState::Acquiring {
            debug!(%lock_id, client = %self.id, state = %record.state, "stale retry ignored");
            return;
        }
        if !record.retry_signal {
            record.retry_signal = true;
            slot.changed.notify_waiters();
        }
    }

    /// Send `lock_id` back to the server. The record must be `Releasing`.
    async fn return_to_server(&self, lock_id: LockId, slot: &LockSlot) -> Result<()> {
        if let Some(hook) = &self.hook {
            hook.on_release(lock_id);
        }
        self.stats.inc_release_rpcs();
        let outcome = match self.server.release(lock_id, &self.id).await {
            Ok(LockReply::Released) => Ok(()),
            Ok(LockReply::NoSuchLock(id)) => {
                warn!(lock_id = %id, client = %self.id, "server has no record of lock, treating as released");
                Ok(())
            }
            Ok(other) => Err(LockError::UnexpectedReply {
                op: "release",
                reply: format!("{:?}", other),
            }),
            Err(e) => Err(e),
        };

        let mut record = slot.record();
        match &outcome {
            Ok(()) => {
                record.state = LockState::Idle;
                record.revoke_pending = false;
                debug!(%lock_id, client = %self.id, "returned to server");
            }
            Err(e) => {
                // Keep the grant and the request so the next release tries again.
                record.state = LockState::CachedFree;
                record.revoke_pending = true;
                warn!(%lock_id, client = %self.id, error = %e, "server release failed");
            }
        }
        slot.changed.notify_waiters();
        outcome
    }

    /// States of every lock this client has touched.
    pub fn states(&self) -> HashMap<LockId, LockState> {
        self.locks
            .iter()
            .map(|entry| (*entry.key(), entry.value().record().state))
            .collect()
    }
}

impl Drop for CachingLockClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
