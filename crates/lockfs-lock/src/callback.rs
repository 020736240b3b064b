//! Server → client callback delivery.
//!
//! Each caching client runs a small RPC endpoint; the server reaches it
//! through a [`CallbackSink`] using the client's id as the address.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use lockfs_transport::{Frame, RpcClientConfig, RpcClientPool, RpcHandler, TransportError};
use tracing::debug;

use crate::client_cache::CachingLockClient;
use crate::error::Result;
use crate::rpc::{decode_request, encode, CallbackReply, CallbackRequest};
use crate::types::{ClientId, LockId};

/// Delivers revoke and retry notifications to clients.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// Ask `client` to return `lock_id`.
    async fn revoke(&self, client: &ClientId, lock_id: LockId) -> Result<()>;

    /// Tell `client` it now owns `lock_id`.
    async fn retry(&self, client: &ClientId, lock_id: LockId) -> Result<()>;
}

/// [`CallbackSink`] that dials each client's callback endpoint over TCP.
pub struct RpcCallbackSink {
    pool: RpcClientPool,
}

impl RpcCallbackSink {
    /// Create a sink whose connections use `config`.
    pub fn new(config: RpcClientConfig) -> Self {
        Self {
            pool: RpcClientPool::new(config),
        }
    }

    async fn send(&self, client: &ClientId, request: CallbackRequest) -> Result<()> {
        let payload = encode(&request)?;
        self.pool
            .call(client.as_str(), request.opcode(), payload)
            .await?;
        Ok(())
    }
}

impl Default for RpcCallbackSink {
    fn default() -> Self {
        Self::new(RpcClientConfig::default())
    }
}

#[async_trait]
impl CallbackSink for RpcCallbackSink {
    async fn revoke(&self, client: &ClientId, lock_id: LockId) -> Result<()> {
        self.send(client, CallbackRequest::Revoke { lock_id }).await
    }

    async fn retry(&self, client: &ClientId, lock_id: LockId) -> Result<()> {
        self.send(client, CallbackRequest::Retry { lock_id }).await
    }
}

/// RPC handler on the client side of the callback channel.
pub struct CallbackHandler {
    client: Weak<CachingLockClient>,
}

impl CallbackHandler {
    /// Route callbacks to `client` for as long as it is alive.
    pub fn new(client: &Arc<CachingLockClient>) -> Self {
        Self {
            client: Arc::downgrade(client),
        }
    }
}

impl RpcHandler for CallbackHandler {
    fn handle(
        &self,
        request: Frame,
    ) -> Pin<Box<dyn Future<Output = lockfs_transport::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            let callback = decode_request(&request, CallbackRequest::opcode)
                .map_err(|e| TransportError::Remote(e.to_string()))?;
            let client = self
                .client
                .upgrade()
                .ok_or_else(|| TransportError::Remote("lock client shut down".to_string()))?;
            debug!(client = %client.id(), ?callback, "callback received");
            let result = match callback {
                CallbackRequest::Revoke { lock_id } => client.revoke_handler(lock_id).await,
                CallbackRequest::Retry { lock_id } => {
                    client.retry_handler(lock_id);
                    Ok(())
                }
            };
            result.map_err(|e| TransportError::Remote(e.to_string()))?;
            encode(&CallbackReply::Ack).map_err(|e| TransportError::SerializationError(e.to_string()))
        })
    }
}
