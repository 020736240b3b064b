//! Baseline lock server.
//!
//! One global table of held/free flags. `acquire` parks the caller until the
//! lock is free; nothing is cached on clients and no callbacks are sent. No
//! ordering is promised among parked callers: whoever wakes first wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::Result;
use crate::rpc::LockReply;
use crate::service::LockService;
use crate::types::{ClientId, LockId};

#[derive(Default)]
struct LockSlot {
    held: bool,
    freed: Arc<Notify>,
}

#[derive(Default)]
struct LockTable {
    locks: HashMap<LockId, LockSlot>,
    acquire_count: u64,
}

/// Blocking, non-caching lock server.
#[derive(Default)]
pub struct LockServer {
    table: Mutex<LockTable>,
}

impl LockServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until `lock_id` is free, claim it, and return the acquisition counter.
    pub async fn acquire(&self, client_id: &ClientId, lock_id: LockId) -> u64 {
        loop {
            let freed = {
                let mut guard = self.table();
                let table = &mut *guard;
                let slot = table.locks.entry(lock_id).or_default();
                if !slot.held {
                    slot.held = true;
                    table.acquire_count += 1;
                    debug!(%lock_id, client = %client_id, count = table.acquire_count, "lock acquired");
                    return table.acquire_count;
                }
                slot.freed.clone()
            };
            // A release between dropping the table and this await leaves a
            // permit in the Notify, so the wakeup is not lost.
            freed.notified().await;
        }
    }

    /// Free `lock_id`, wake one parked caller, and return the decremented counter.
    ///
    /// Releasing a lock that is not held changes nothing.
    pub fn release(&self, client_id: &ClientId, lock_id: LockId) -> u64 {
        let mut guard = self.table();
        let table = &mut *guard;
        if let Some(slot) = table.locks.get_mut(&lock_id) {
            if slot.held {
                slot.held = false;
                table.acquire_count = table.acquire_count.saturating_sub(1);
                slot.freed.notify_one();
                debug!(%lock_id, client = %client_id, count = table.acquire_count, "lock released");
            }
        }
        table.acquire_count
    }

    /// Current value of the acquisition counter.
    pub fn stat(&self, lock_id: LockId) -> u64 {
        let count = self.table().acquire_count;
        debug!(%lock_id, count, "stat");
        count
    }

    /// True while some client holds `lock_id`.
    pub fn is_held(&self, lock_id: LockId) -> bool {
        self.table().locks.get(&lock_id).is_some_and(|slot| slot.held)
    }
}

#[async_trait]
impl LockService for LockServer {
    async fn acquire(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply> {
        Ok(LockReply::Count(LockServer::acquire(self, client_id, lock_id).await))
    }

    async fn release(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply> {
        Ok(LockReply::Count(LockServer::release(self, client_id, lock_id)))
    }

    async fn stat(&self, lock_id: LockId) -> Result<u64> {
        Ok(LockServer::stat(self, lock_id))
    }
}
