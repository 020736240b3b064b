use lockfs_transport::TransportError;
use thiserror::Error;

use crate::types::LockId;

/// Errors surfaced by lock servers and clients.
#[derive(Debug, Error)]
pub enum LockError {
    /// Release of a lock id the server never issued to this caller, or that
    /// this client has never touched.
    #[error("no such lock: {0}")]
    NoSuchLock(LockId),

    /// Local release of a lock no local thread holds.
    #[error("lock {0} is not held by this client")]
    NotHeld(LockId),

    /// The RPC substrate could not complete the call.
    #[error("remote error: {0}")]
    Transport(#[from] TransportError),

    /// A request frame whose payload could not be interpreted.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The peer answered with a reply that does not fit the request.
    #[error("unexpected reply to {op}: {reply}")]
    UnexpectedReply {
        /// Operation that was issued.
        op: &'static str,
        /// Debug rendering of what came back.
        reply: String,
    },
}

impl LockError {
    /// True when the failure came from the network rather than lock semantics.
    pub fn is_remote(&self) -> bool {
        matches!(self, LockError::Transport(_))
    }
}

/// Result alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(LockError::NoSuchLock(LockId::new(9)).to_string(), "no such lock: 9");
        assert_eq!(
            LockError::NotHeld(LockId::new(3)).to_string(),
            "lock 3 is not held by this client"
        );
    }

    #[test]
    fn test_transport_is_remote() {
        let err: LockError = TransportError::ConnectionReset.into();
        assert!(err.is_remote());
        assert!(!LockError::NoSuchLock(LockId::new(1)).is_remote());
        assert_eq!(err.to_string(), "remote error: connection reset by peer");
    }
}
