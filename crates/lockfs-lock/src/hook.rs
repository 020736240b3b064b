//! Release notification for the layer that consumes the lock client.

use crate::types::LockId;

/// Called whenever a caching client hands a lock back to the server.
///
/// Runs before the release RPC, so whatever state the lock protects can be
/// flushed or invalidated while this client still owns it.
pub trait ReleaseHook: Send + Sync {
    /// The client is about to give up `lock_id`.
    fn on_release(&self, lock_id: LockId);
}

impl<F> ReleaseHook for F
where
    F: Fn(LockId) + Send + Sync,
{
    fn on_release(&self, lock_id: LockId) {
        self(lock_id)
    }
}
