//! Randomized lock workloads for caching clients.

use std::sync::Arc;
use std::time::Duration;

use lockfs_lock::{CachingLockClient, LockId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::exclusion::HoldTracker;

#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub locks: Vec<LockId>,
    pub rounds: usize,
    /// Upper bound on time spent inside each critical section.
    pub max_hold: Duration,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            locks: vec![LockId::BLOCK_BITMAP, LockId::for_inode(1), LockId::for_inode(2)],
            rounds: 20,
            max_hold: Duration::from_millis(2),
            seed: 0x10c4,
        }
    }
}

/// Acquire random locks from `config.locks`, report each hold to `tracker`.
pub async fn run_client(
    client: Arc<CachingLockClient>,
    tracker: Arc<HoldTracker>,
    config: WorkloadConfig,
) -> lockfs_lock::Result<()> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let max_hold_us = config.max_hold.as_micros().max(1) as u64;
    for _ in 0..config.rounds {
        let lock_id = config.locks[rng.gen_range(0..config.locks.len())];
        let hold = Duration::from_micros(rng.gen_range(0..max_hold_us));

        client.acquire(lock_id).await?;
        tracker.enter(lock_id, client.id());
        tokio::time::sleep(hold).await;
        tracker.exit(lock_id, client.id());
        client.release(lock_id).await?;
    }
    Ok(())
}

/// Run one workload per client concurrently, with per-client seeds.
pub async fn run_all(
    clients: &[Arc<CachingLockClient>],
    tracker: Arc<HoldTracker>,
    config: WorkloadConfig,
) -> anyhow::Result<()> {
    let mut tasks = Vec::with_capacity(clients.len());
    for (i, client) in clients.iter().enumerate() {
        let config = WorkloadConfig {
            seed: config.seed.wrapping_add(i as u64),
            ..config.clone()
        };
        tasks.push(tokio::spawn(run_client(client.clone(), tracker.clone(), config)));
    }
    for task in tasks {
        task.await??;
    }
    Ok(())
}
