//! LockFS Test & Validation Infrastructure
//!
//! In-process and loopback-TCP lock clusters, a mutual exclusion checker,
//! randomized workloads, and the multi-client protocol tests built on them.

pub mod exclusion;
pub mod harness;
pub mod workload;


pub use exclusion::{HoldTracker, Violation};
pub use harness::{
    init_tracing, CallbackKind, Delivered, InProcessCluster, LocalCallbackSink, TcpCluster, TestEnv,
};
pub use workload::{run_all, run_client, WorkloadConfig};
