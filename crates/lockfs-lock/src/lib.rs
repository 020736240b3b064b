#![warn(missing_docs)]

//! LockFS lock subsystem: baseline and caching lock servers, the caching
//! client with its revoke/retry callback endpoint, and the lock id scheme
//! shared with the filesystem layer.

pub mod callback;
pub mod cli;
pub mod client;
pub mod client_cache;
pub mod config;
pub mod error;
pub mod hook;
pub mod rpc;
pub mod server;
pub mod server_cache;
pub mod service;
pub mod stats;
pub mod types;

pub use callback::{CallbackHandler, CallbackSink, RpcCallbackSink};
pub use client::LockClient;
pub use client_cache::CachingLockClient;
pub use config::{ClientConfig, LockdConfig, ServerMode};
pub use error::{LockError, Result};
pub use hook::ReleaseHook;
pub use rpc::{CallbackReply, CallbackRequest, LockReply, LockRequest};
pub use server::LockServer;
pub use server_cache::{CachingLockServer, LockRecordSnapshot};
pub use service::{LockService, LockServiceHandler, RemoteLockService};
pub use stats::{ClientStats, ClientStatsSnapshot};
pub use types::{ClientId, LockId, LockState, LockStatus};
