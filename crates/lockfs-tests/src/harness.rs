//! Test Harness - in-process and loopback lock clusters

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use lockfs_lock::{
    CachingLockClient, CachingLockServer, CallbackSink, ClientConfig, ClientId, LockError,
    LockId, LockService, LockServiceHandler, ReleaseHook, RpcCallbackSink,
};
use lockfs_transport::{RpcServer, TransportError};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Which callback a client was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Revoke,
    Retry,
}

/// One callback as the server issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub kind: CallbackKind,
    pub client: ClientId,
    pub lock_id: LockId,
}

/// Callback sink that calls straight into registered in-process clients
/// and keeps a log of every callback it was asked to deliver.
#[derive(Default)]
pub struct LocalCallbackSink {
    clients: DashMap<ClientId, Weak<CachingLockClient>>,
    log: Mutex<Vec<Delivered>>,
}

impl LocalCallbackSink {
    pub fn register(&self, client: &Arc<CachingLockClient>) {
        self.clients
            .insert(client.id().clone(), Arc::downgrade(client));
    }

    pub fn unregister(&self, id: &ClientId) {
        self.clients.remove(id);
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.log.lock().unwrap().clone()
    }

    pub fn delivered_for(&self, lock_id: LockId, kind: CallbackKind) -> Vec<ClientId> {
        self.delivered()
            .into_iter()
            .filter(|d| d.lock_id == lock_id && d.kind == kind)
            .map(|d| d.client)
            .collect()
    }

    fn record(&self, kind: CallbackKind, client: &ClientId, lock_id: LockId) {
        self.log.lock().unwrap().push(Delivered {
            kind,
            client: client.clone(),
            lock_id,
        });
    }

    fn lookup(&self, id: &ClientId) -> lockfs_lock::Result<Arc<CachingLockClient>> {
        self.clients
            .get(id)
            .and_then(|c| c.upgrade())
            .ok_or(LockError::Transport(TransportError::ConnectionReset))
    }
}

#[async_trait]
impl CallbackSink for LocalCallbackSink {
    async fn revoke(&self, client: &ClientId, lock_id: LockId) -> lockfs_lock::Result<()> {
        self.record(CallbackKind::Revoke, client, lock_id);
        self.lookup(client)?.revoke_handler(lock_id).await
    }

    async fn retry(&self, client: &ClientId, lock_id: LockId) -> lockfs_lock::Result<()> {
        self.record(CallbackKind::Retry, client, lock_id);
        self.lookup(client)?.retry_handler(lock_id);
        Ok(())
    }
}

/// Caching server plus clients in one process, no sockets.
pub struct InProcessCluster {
    pub server: Arc<CachingLockServer>,
    pub sink: Arc<LocalCallbackSink>,
}

impl InProcessCluster {
    pub fn new() -> Self {
        let sink = Arc::new(LocalCallbackSink::default());
        Self {
            server: Arc::new(CachingLockServer::new(sink.clone())),
            sink,
        }
    }

    pub fn client(&self, name: &str) -> Arc<CachingLockClient> {
        self.client_with(name, None, &ClientConfig::default())
    }

    pub fn client_with(
        &self,
        name: &str,
        hook: Option<Arc<dyn ReleaseHook>>,
        config: &ClientConfig,
    ) -> Arc<CachingLockClient> {
        let client = Arc::new(CachingLockClient::new(
            ClientId::new(name),
            self.server.clone(),
            hook,
            config,
        ));
        self.sink.register(&client);
        client
    }
}

impl Default for InProcessCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// A lock server on a loopback port.
pub struct TcpCluster {
    addr: String,
    server_task: JoinHandle<()>,
}

impl TcpCluster {
    /// Serve `service` on `127.0.0.1:0`.
    pub async fn start(service: Arc<dyn LockService>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let server_task = RpcServer::spawn(listener, Arc::new(LockServiceHandler::new(service)));
        Ok(Self { addr, server_task })
    }

    /// Start a caching server that reaches clients over TCP.
    pub async fn caching() -> anyhow::Result<(Self, Arc<CachingLockServer>)> {
        let server = Arc::new(CachingLockServer::new(Arc::new(RpcCallbackSink::default())));
        let cluster = Self::start(server.clone()).await?;
        Ok((cluster, server))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_addr: self.addr.clone(),
            ..ClientConfig::default()
        }
    }

    /// Connect a caching client with its own callback endpoint.
    pub async fn client(&self) -> anyhow::Result<Arc<CachingLockClient>> {
        Ok(CachingLockClient::connect(&self.client_config(), None).await?)
    }
}

impl Drop for TcpCluster {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

/// Scratch directory for config files.
#[derive(Debug)]
pub struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp_dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn tempdir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a client config pointing at `server_addr` and return its path.
    pub fn write_client_config(&self, server_addr: &str, release_threshold: usize) -> PathBuf {
        let path = self.tempdir().join("client.toml");
        let body = format!(
            "server_addr = \"{}\"\nrelease_threshold = {}\n",
            server_addr, release_threshold
        );
        std::fs::write(&path, body).expect("failed to write config");
        path
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_writes_loadable_config() {
        let env = TestEnv::new();
        let path = env.write_client_config("127.0.0.1:9999", 2);
        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:9999");
        assert_eq!(config.release_threshold, 2);
        assert_eq!(config.callback_bind, "127.0.0.1:0");
    }

    #[tokio::test]
    async fn test_sink_reports_unknown_client() {
        let sink = LocalCallbackSink::default();
        let err = sink
            .retry(&ClientId::new("ghost"), LockId::new(1))
            .await
            .unwrap_err();
        assert!(err.is_remote());
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_client_no_longer_reachable() {
        let cluster = InProcessCluster::new();
        let a = cluster.client("a");
        cluster.sink.unregister(a.id());
        assert!(cluster.sink.revoke(a.id(), LockId::new(1)).await.is_err());
    }
}
