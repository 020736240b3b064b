//! Lock RPC message types.
//!
//! Requests carry their own opcode so both ends agree on what a frame means
//! before the payload is decoded.

use lockfs_transport::{deserialize_message, serialize_message, Frame, Opcode};
use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};
use crate::types::{ClientId, LockId, LockStatus};

/// Client → server requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockRequest {
    /// Ask for ownership of a lock.
    Acquire {
        /// Lock being requested.
        lock_id: LockId,
        /// Requesting client.
        client_id: ClientId,
    },
    /// Give a lock back.
    Release {
        /// Lock being returned.
        lock_id: LockId,
        /// Returning client.
        client_id: ClientId,
    },
    /// Read the diagnostic acquisition counter.
    Stat {
        /// Lock being inspected.
        lock_id: LockId,
    },
}

impl LockRequest {
    /// Wire opcode for this request.
    pub fn opcode(&self) -> Opcode {
        match self {
            LockRequest::Acquire { .. } => Opcode::Acquire,
            LockRequest::Release { .. } => Opcode::Release,
            LockRequest::Stat { .. } => Opcode::Stat,
        }
    }

    /// Lock this request targets.
    pub fn lock_id(&self) -> LockId {
        match self {
            LockRequest::Acquire { lock_id, .. }
            | LockRequest::Release { lock_id, .. }
            | LockRequest::Stat { lock_id } => *lock_id,
        }
    }
}

/// Server → client replies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockReply {
    /// Caching acquire granted.
    Granted,
    /// Caching acquire queued; wait for a retry callback.
    Retry,
    /// Caching release accepted.
    Released,
    /// Acquisition counter (baseline acquire/release, and stat on both servers).
    Count(u64),
    /// Release of a lock the server has no record of.
    NoSuchLock(LockId),
}

impl From<LockStatus> for LockReply {
    fn from(status: LockStatus) -> Self {
        match status {
            LockStatus::Granted => LockReply::Granted,
            LockStatus::Retry => LockReply::Retry,
        }
    }
}

/// Server → client callbacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackRequest {
    /// Give the lock back as soon as no local thread needs it.
    Revoke {
        /// Lock being recalled.
        lock_id: LockId,
    },
    /// The client is now the owner of a lock it queued for.
    Retry {
        /// Lock now owned.
        lock_id: LockId,
    },
}

impl CallbackRequest {
    /// Wire opcode for this callback.
    pub fn opcode(&self) -> Opcode {
        match self {
            CallbackRequest::Revoke { .. } => Opcode::Revoke,
            CallbackRequest::Retry { .. } => Opcode::Retry,
        }
    }
}

/// Callback acknowledgement; carries nothing of interest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackReply {
    /// Callback processed.
    Ack,
}

/// Decode a request frame, rejecting payloads that disagree with the opcode.
pub fn decode_request<T>(frame: &Frame, opcode_of: impl Fn(&T) -> Opcode) -> Result<T>
where
    T: serde::de::DeserializeOwned + std::fmt::Debug,
{
    let msg: T = deserialize_message(&frame.payload)?;
    if opcode_of(&msg) != frame.opcode() {
        return Err(LockError::Malformed(format!(
            "{:?} under opcode {:?}",
            msg,
            frame.opcode()
        )));
    }
    Ok(msg)
}

/// Encode any message for the wire.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    Ok(serialize_message(msg)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_opcodes() {
        let client_id = ClientId::new("127.0.0.1:5000");
        let acquire = LockRequest::Acquire {
            lock_id: LockId::new(7),
            client_id: client_id.clone(),
        };
        assert_eq!(acquire.opcode(), Opcode::Acquire);
        assert_eq!(acquire.lock_id(), LockId::new(7));
        let release = LockRequest::Release {
            lock_id: LockId::new(8),
            client_id,
        };
        assert_eq!(release.opcode(), Opcode::Release);
        assert_eq!(LockRequest::Stat { lock_id: LockId::new(1) }.opcode(), Opcode::Stat);
    }

    #[test]
    fn test_decode_checks_opcode() {
        let req = LockRequest::Stat {
            lock_id: LockId::new(3),
        };
        let good = Frame::new(Opcode::Stat, 1, encode(&req).unwrap());
        let decoded: LockRequest = decode_request(&good, LockRequest::opcode).unwrap();
        assert_eq!(decoded, req);

        let mislabeled = Frame::new(Opcode::Acquire, 2, encode(&req).unwrap());
        let result: Result<LockRequest> = decode_request(&mislabeled, LockRequest::opcode);
        assert!(matches!(result, Err(LockError::Malformed(_))));
    }

    #[test]
    fn test_callback_opcodes() {
        let revoke = CallbackRequest::Revoke {
            lock_id: LockId::BLOCK_BITMAP,
        };
        assert_eq!(revoke.opcode(), Opcode::Revoke);
        let frame = Frame::new(Opcode::Revoke, 5, encode(&revoke).unwrap());
        let decoded: CallbackRequest = decode_request(&frame, CallbackRequest::opcode).unwrap();
        assert_eq!(decoded, revoke);
    }

    #[test]
    fn test_status_into_reply() {
        assert_eq!(LockReply::from(LockStatus::Granted), LockReply::Granted);
        assert_eq!(LockReply::from(LockStatus::Retry), LockReply::Retry);
    }
}
