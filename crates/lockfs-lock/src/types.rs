use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Identifies a lockable resource.
///
/// Lock ids map 1:1 onto inode numbers. Id 0 is never an inode; it is the
/// single global lock guarding block-allocation metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockId(u64);

impl LockId {
    /// The lock protecting the block-allocation bitmap.
    pub const BLOCK_BITMAP: LockId = LockId(0);

    /// Creates a new LockId from a raw u64 value
    pub fn new(id: u64) -> Self {
        LockId(id)
    }

    /// The lock guarding an inode's attributes and, for directories, its entries.
    pub fn for_inode(ino: u64) -> Self {
        debug_assert!(ino != 0, "inode 0 collides with the block bitmap lock");
        LockId(ino)
    }

    /// True for the block-allocation bitmap lock.
    pub fn is_block_bitmap(self) -> bool {
        self == Self::BLOCK_BITMAP
    }

    /// Returns the raw u64 value of this lock ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LockId {
    fn from(id: u64) -> Self {
        LockId(id)
    }
}

/// Identity of a caching client: the `host:port` of its callback endpoint.
///
/// Self-reported and unauthenticated. The server dials this address to
/// deliver revoke and retry callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a ClientId from any address-like string.
    pub fn new(id: impl Into<String>) -> Self {
        ClientId(id.into())
    }

    /// Callback address as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        ClientId(addr.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server verdict on a caching `acquire`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    /// The caller owns the lock now.
    Granted,
    /// The caller is queued; a retry callback will announce ownership.
    Retry,
}

/// Per-lock state on a caching client.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    /// Not owned by this client.
    Idle,
    /// Owned by this client, no local thread using it.
    CachedFree,
    /// A local thread holds it.
    Held,
    /// Server acquire in flight.
    Acquiring,
    /// Handing the lock back to the server.
    Releasing,
}

impl LockState {
    /// States in which a new local `acquire()` must wait.
    pub fn blocks_acquire(self) -> bool {
        matches!(
            self,
            LockState::Held | LockState::Acquiring | LockState::Releasing
        )
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockState::Idle => "idle",
            LockState::CachedFree => "cached-free",
            LockState::Held => "held",
            LockState::Acquiring => "acquiring",
            LockState::Releasing => "releasing",
        };
        f.write_str(name)
    }
}
