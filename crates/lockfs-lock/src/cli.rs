//! `lockfs-lockd` command line.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client_cache::CachingLockClient;
use crate::config::{ClientConfig, ServerMode};
use crate::hook::ReleaseHook;
use crate::service::{LockService, RemoteLockService};
use crate::types::LockId;

/// Lock daemon and operator tools.
#[derive(Parser)]
#[command(name = "lockfs-lockd")]
#[command(about = "LockFS distributed lock server", long_about = None)]
pub struct Cli {
    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run a lock server.
    Serve {
        /// Config file (toml or json); defaults are used if it is missing.
        #[arg(short, long, default_value = "/etc/lockfs/lockd.toml")]
        config: PathBuf,
        /// Listen address, overriding the config file.
        #[arg(short, long)]
        bind: Option<SocketAddr>,
        /// Server variant, overriding the config file.
        #[arg(short, long, value_enum)]
        mode: Option<ServerMode>,
    },
    /// Print a server's acquisition counter.
    Stat {
        /// Lock server address.
        #[arg(short, long, default_value = "127.0.0.1:7410", env = "LOCKFS_SERVER")]
        server: String,
        /// Lock to query.
        lock_id: u64,
    },
    /// Take a lock through a caching client, hold it, then release it.
    Hold {
        /// Lock server address.
        #[arg(short, long, default_value = "127.0.0.1:7410", env = "LOCKFS_SERVER")]
        server: String,
        /// Lock to hold.
        lock_id: u64,
        /// How long to hold it.
        #[arg(long, default_value = "1000")]
        millis: u64,
    },
}

impl Cli {
    /// Run the client-side subcommands. `serve` is handled by the binary.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve { .. } => anyhow::bail!("serve is run by the daemon entry point"),
            Command::Stat { ref server, lock_id } => stat(server, LockId::new(lock_id)).await,
            Command::Hold {
                ref server,
                lock_id,
                millis,
            } => hold(server, LockId::new(lock_id), Duration::from_millis(millis)).await,
        }
    }
}

async fn stat(server: &str, lock_id: LockId) -> Result<()> {
    let service = RemoteLockService::connect(server, ClientConfig::default().rpc_config()).await?;
    let count = service.stat(lock_id).await?;
    println!("lock {}: {}", lock_id, count);
    Ok(())
}

async fn hold(server: &str, lock_id: LockId, duration: Duration) -> Result<()> {
    let config = ClientConfig {
        server_addr: server.to_string(),
        ..ClientConfig::default()
    };
    let hook: Arc<dyn ReleaseHook> = Arc::new(|id: LockId| tracing::info!(lock_id = %id, "returning lock to server"));
    let client = CachingLockClient::connect(&config, Some(hook)).await?;

    client.acquire(lock_id).await?;
    println!("holding lock {} as {}", lock_id, client.id());
    tokio::time::sleep(duration).await;
    client.release(lock_id).await?;

    let state = client
        .state(lock_id)
        .map(|s| s.to_string())
        .unwrap_or_default();
    println!("released lock {} (now {})", lock_id, state);
    println!("{}", serde_json::to_string_pretty(&client.stats())?);
    client.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from(["lockfs-lockd", "serve", "--bind", "0.0.0.0:9000", "--mode", "baseline"]);
        match cli.command {
            Command::Serve { config, bind, mode } => {
                assert_eq!(config, PathBuf::from("/etc/lockfs/lockd.toml"));
                assert_eq!(bind, Some("0.0.0.0:9000".parse().unwrap()));
                assert_eq!(mode, Some(ServerMode::Baseline));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_hold() {
        let cli = Cli::parse_from(["lockfs-lockd", "hold", "--server", "10.0.0.1:7410", "0", "--millis", "5"]);
        match cli.command {
            Command::Hold {
                server,
                lock_id,
                millis,
            } => {
                assert_eq!(server, "10.0.0.1:7410");
                assert!(LockId::new(lock_id).is_block_bitmap());
                assert_eq!(millis, 5);
            }
            _ => panic!("expected hold"),
        }
    }

    #[tokio::test]
    async fn test_hold_and_stat_against_caching_server() {
        let sink = Arc::new(crate::callback::RpcCallbackSink::default());
        let server = Arc::new(crate::server_cache::CachingLockServer::new(sink));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        lockfs_transport::RpcServer::spawn(
            listener,
            Arc::new(crate::service::LockServiceHandler::new(server.clone())),
        );

        hold(&addr, LockId::new(3), Duration::from_millis(1)).await.unwrap();
        stat(&addr, LockId::new(3)).await.unwrap();
        assert_eq!(server.stat(LockId::new(3)), 1);
    }
}
