#![warn(missing_docs)]

//! LockFS transport subsystem: framed TCP RPC carrying lock requests and
//! server-to-client revoke/retry callbacks.

pub mod connection;
pub mod error;
pub mod message;
pub mod metrics;
pub mod protocol;
pub mod rpc;
pub mod tcp;

pub use connection::{PoolStats, RpcClientPool};
pub use error::{Result, TransportError};
pub use message::{deserialize_message, serialize_message};
pub use metrics::{Counter, MetricsSnapshot, TransportMetrics};
pub use protocol::{Frame, FrameFlags, FrameHeader, Opcode};
pub use rpc::{RpcClient, RpcClientConfig, RpcHandler, RpcServer};
pub use tcp::{dial, split, FrameReader, FrameWriter, TcpConfig};
