use anyhow::Result;
use clap::Parser;
use lockfs_lock::cli::{Cli, Command};
use lockfs_lock::{
    CachingLockServer, LockServer, LockService, LockServiceHandler, LockdConfig, RpcCallbackSink,
    ServerMode,
};
use lockfs_transport::RpcServer;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Serve { config, bind, mode } => serve(config, *bind, *mode).await,
        _ => cli.run().await,
    }
}

async fn serve(config_path: &Path, bind: Option<SocketAddr>, mode: Option<ServerMode>) -> Result<()> {
    let mut config = if config_path.exists() {
        LockdConfig::from_file(config_path)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", config_path.display());
        LockdConfig::default()
    };
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }
    if let Some(mode) = mode {
        config.mode = mode;
    }

    let service: Arc<dyn LockService> = match config.mode {
        ServerMode::Baseline => Arc::new(LockServer::new()),
        ServerMode::Caching => {
            let callbacks = Arc::new(RpcCallbackSink::new(config.rpc_config()));
            Arc::new(CachingLockServer::new(callbacks))
        }
    };

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, mode = ?config.mode, "lock server listening");

    tokio::select! {
        result = RpcServer::serve(listener, Arc::new(LockServiceHandler::new(service))) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}
