//! Pool of RPC clients keyed by peer address.
//!
//! The lock server uses this to reach client callback endpoints: one
//! multiplexed connection per client, opened lazily and dropped on failure.

use crate::error::Result;
use crate::protocol::{Frame, Opcode};
use crate::rpc::{RpcClient, RpcClientConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Number of peers with a live client.
    pub peers: usize,
}

/// Connection pool managing one RPC client per peer.
pub struct RpcClientPool {
    config: RpcClientConfig,
    clients: Mutex<HashMap<String, Arc<RpcClient>>>,
}

impl RpcClientPool {
    /// Create a new, empty pool.
    pub fn new(config: RpcClientConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the client for the given peer address.
    pub async fn get(&self, addr: &str) -> Result<Arc<RpcClient>> {
        {
            let clients = self.clients.lock().await;
            if let Some(client) = clients.get(addr) {
                if !client.is_closed().await {
                    return Ok(client.clone());
                }
            }
        }
        let client = Arc::new(RpcClient::connect(addr, self.config.clone()).await?);
        let mut clients = self.clients.lock().await;
        // Another caller may have connected while we were dialing; keep the first live one.
        if let Some(existing) = clients.get(addr) {
            if !existing.is_closed().await {
                return Ok(existing.clone());
            }
        }
        clients.insert(addr.to_string(), client.clone());
        debug!(peer = addr, "pooled new RPC client");
        Ok(client)
    }

    /// Call `opcode` on `addr`, evicting the peer if the call fails.
    pub async fn call(&self, addr: &str, opcode: Opcode, payload: Vec<u8>) -> Result<Frame> {
        let client = self.get(addr).await?;
        let result = client.call(opcode, payload).await;
        if result.is_err() {
            self.remove_peer(addr).await;
        }
        result
    }

    /// Remove the client for a peer.
    pub async fn remove_peer(&self, addr: &str) {
        let mut clients = self.clients.lock().await;
        clients.remove(addr);
    }

    /// Get pool statistics.
    pub async fn stats(&self) -> PoolStats {
        let clients = self.clients.lock().await;
        PoolStats {
            peers: clients.len(),
        }
    }
}
