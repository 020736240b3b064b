//! Baseline lock client: every call goes to the server.

use std::sync::Arc;

use lockfs_transport::RpcClientConfig;
use tracing::debug;

use crate::error::{LockError, Result};
use crate::rpc::LockReply;
use crate::service::{LockService, RemoteLockService};
use crate::types::{ClientId, LockId};

/// Non-caching client for the baseline server.
pub struct LockClient {
    id: ClientId,
    server: Arc<dyn LockService>,
}

impl LockClient {
    /// Client known to `server` as `id`.
    pub fn new(id: ClientId, server: Arc<dyn LockService>) -> Self {
        Self { id, server }
    }

    /// Connect to the server at `addr` over RPC.
    ///
    /// `config.response_timeout_ms` bounds release and stat only; acquire
    /// waits as long as the server keeps the caller queued.
    pub async fn connect(id: ClientId, addr: &str, config: RpcClientConfig) -> Result<Self> {
        let server = RemoteLockService::connect(addr, config)
            .await?
            .with_blocking_acquire();
        Ok(Self::new(id, Arc::new(server)))
    }

    /// Identity sent with every request.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Block until the server grants `lock_id`; returns the server's counter.
    pub async fn acquire(&self, lock_id: LockId) -> Result<u64> {
        let reply = self.server.acquire(lock_id, &self.id).await?;
        let count = expect_count("acquire", reply)?;
        debug!(%lock_id, client = %self.id, count, "acquired");
        Ok(count)
    }

    /// Return `lock_id`; returns the server's counter.
    pub async fn release(&self, lock_id: LockId) -> Result<u64> {
        let reply = self.server.release(lock_id, &self.id).await?;
        let count = expect_count("release", reply)?;
        debug!(%lock_id, client = %self.id, count, "released");
        Ok(count)
    }

    /// Server's diagnostic counter.
    pub async fn stat(&self, lock_id: LockId) -> Result<u64> {
        self.server.stat(lock_id).await
    }
}

fn expect_count(op: &'static str, reply: LockReply) -> Result<u64> {
    match reply {
        LockReply::Count(n) => Ok(n),
        other => Err(LockError::UnexpectedReply {
            op,
            reply: format!("{:?}", other),
        }),
    }
}
