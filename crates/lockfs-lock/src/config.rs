//! Daemon and client settings, loadable from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use lockfs_transport::RpcClientConfig;

/// Which lock server variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Blocking acquire, no client caching.
    Baseline,
    /// Cached grants with revoke/retry callbacks.
    Caching,
}

/// Lock daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockdConfig {
    /// Address the lock service listens on.
    pub bind_addr: SocketAddr,
    /// Server variant to run.
    pub mode: ServerMode,
    /// Timeout for callback RPCs to clients.
    pub response_timeout_ms: u64,
}

impl Default for LockdConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7410)),
            mode: ServerMode::Caching,
            response_timeout_ms: 5000,
        }
    }
}

impl LockdConfig {
    /// Load from a `.toml` or `.json` file; missing fields take defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        load(path)
    }

    /// RPC settings for the server's callback connections.
    pub fn rpc_config(&self) -> RpcClientConfig {
        RpcClientConfig {
            response_timeout_ms: self.response_timeout_ms,
            ..RpcClientConfig::default()
        }
    }
}

/// Caching client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Lock server to connect to.
    pub server_addr: String,
    /// Where the callback endpoint listens; port 0 picks an ephemeral port.
    pub callback_bind: String,
    /// Timeout for requests to the lock server.
    pub response_timeout_ms: u64,
    /// A pending revoke forwards the lock on release only while fewer than
    /// this many local callers are waiting for it.
    pub release_threshold: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("127.0.0.1:7410"),
            callback_bind: String::from("127.0.0.1:0"),
            response_timeout_ms: 5000,
            release_threshold: 1,
        }
    }
}

impl ClientConfig {
    /// Load from a `.toml` or `.json` file; missing fields take defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        load(path)
    }

    /// RPC settings for the connection to the lock server.
    pub fn rpc_config(&self) -> RpcClientConfig {
        RpcClientConfig {
            response_timeout_ms: self.response_timeout_ms,
            ..RpcClientConfig::default()
        }
    }
}

fn load<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();

    match ext.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(&contents)?),
        "json" => Ok(serde_json::from_str(&contents)?),
        _ => anyhow::bail!("Unsupported config file extension: {}", ext),
    }
}
