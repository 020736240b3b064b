//! The lock server's request surface, local or over RPC.
//!
//! Clients only see [`LockService`]; whether the server lives in the same
//! process or behind a socket is decided at construction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use lockfs_transport::{
    deserialize_message, Frame, RpcClient, RpcClientConfig, RpcHandler, TransportError,
};
use tracing::debug;

use crate::error::{LockError, Result};
use crate::rpc::{decode_request, encode, LockReply, LockRequest};
use crate::types::{ClientId, LockId};

/// Operations a lock server answers.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Ask for `lock_id` on behalf of `client_id`.
    async fn acquire(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply>;

    /// Hand `lock_id` back.
    async fn release(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply>;

    /// Diagnostic acquisition counter.
    async fn stat(&self, lock_id: LockId) -> Result<u64>;
}

/// [`LockService`] stub that forwards every call to a remote server.
pub struct RemoteLockService {
    rpc: RpcClient,
    blocking_acquire: bool,
}

impl RemoteLockService {
    /// Connect to the lock server at `addr`.
    pub async fn connect(addr: &str, config: RpcClientConfig) -> Result<Self> {
        let rpc = RpcClient::connect(addr, config).await?;
        Ok(Self::new(rpc))
    }

    /// Wrap an already connected RPC client.
    pub fn new(rpc: RpcClient) -> Self {
        Self {
            rpc,
            blocking_acquire: false,
        }
    }

    /// Let `acquire` wait without a response timeout.
    ///
    /// The baseline server parks an acquire until the lock frees up and
    /// grants it whether or not the caller is still listening, so a timed
    /// out acquire would leave the lock held by nobody who knows it.
    pub fn with_blocking_acquire(mut self) -> Self {
        self.blocking_acquire = true;
        self
    }

    async fn call(&self, request: LockRequest) -> Result<LockReply> {
        let opcode = request.opcode();
        let payload = encode(&request)?;
        let response = match request {
            LockRequest::Acquire { .. } if self.blocking_acquire => {
                self.rpc.call_with_timeout(opcode, payload, None).await?
            }
            _ => self.rpc.call(opcode, payload).await?,
        };
        Ok(deserialize_message(&response.payload)?)
    }
}

#[async_trait]
impl LockService for RemoteLockService {
    async fn acquire(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply> {
        self.call(LockRequest::Acquire {
            lock_id,
            client_id: client_id.clone(),
        })
        .await
    }

    async fn release(&self, lock_id: LockId, client_id: &ClientId) -> Result<LockReply> {
        self.call(LockRequest::Release {
            lock_id,
            client_id: client_id.clone(),
        })
        .await
    }

    async fn stat(&self, lock_id: LockId) -> Result<u64> {
        match self.call(LockRequest::Stat { lock_id }).await? {
            LockReply::Count(n) => Ok(n),
            other => Err(LockError::UnexpectedReply {
                op: "stat",
                reply: format!("{:?}", other),
            }),
        }
    }
}

/// RPC handler exposing a [`LockService`] on the server's listening socket.
pub struct LockServiceHandler {
    service: Arc<dyn LockService>,
}

impl LockServiceHandler {
    /// Serve `service` to remote clients.
    pub fn new(service: Arc<dyn LockService>) -> Self {
        Self { service }
    }

    async fn dispatch(&self, request: LockRequest) -> Result<LockReply> {
        debug!(?request, "lock request");
        match request {
            LockRequest::Acquire { lock_id, client_id } => {
                self.service.acquire(lock_id, &client_id).await
            }
            LockRequest::Release { lock_id, client_id } => {
                self.service.release(lock_id, &client_id).await
            }
            LockRequest::Stat { lock_id } => self.service.stat(lock_id).await.map(LockReply::Count),
        }
    }
}

impl RpcHandler for LockServiceHandler {
    fn handle(
        &self,
        request: Frame,
    ) -> Pin<Box<dyn Future<Output = lockfs_transport::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            let result = match decode_request(&request, LockRequest::opcode) {
                Ok(req) => self.dispatch(req).await,
                Err(e) => Err(e),
            };
            let reply = result.map_err(|e| TransportError::Remote(e.to_string()))?;
            encode(&reply).map_err(|e| TransportError::SerializationError(e.to_string()))
        })
    }
}
