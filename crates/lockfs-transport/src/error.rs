//! Transport errors.

use thiserror::Error;

/// Everything that can go wrong moving a frame between two peers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dialing did not finish in time.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Address being dialed.
        addr: String,
        /// Limit that expired.
        timeout_ms: u64,
    },

    /// The peer hung up, or the connection is already known dead.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Header and payload disagree.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What was wrong.
        reason: String,
    },

    /// The stream is not speaking this protocol.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// [`MAGIC`](crate::protocol::MAGIC).
        expected: u32,
        /// Value on the wire.
        got: u32,
    },

    /// Peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Our version.
        expected: u8,
        /// Theirs.
        got: u8,
    },

    /// Payload CRC32 does not match the header.
    #[error("checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum of the received payload.
        computed: u32,
    },

    /// Header announces more than [`MAX_PAYLOAD_SIZE`](crate::protocol::MAX_PAYLOAD_SIZE).
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Announced length.
        size: u32,
        /// Largest accepted length.
        max_size: u32,
    },

    /// No response within the call's limit.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request that went unanswered.
        request_id: u64,
        /// Limit that expired.
        timeout_ms: u64,
    },

    /// Opcode outside [`Opcode`](crate::protocol::Opcode).
    #[error("unknown opcode: 0x{0:04X}")]
    UnknownOpcode(u16),

    /// The peer's handler failed; carries its message.
    #[error("remote handler failed: {0}")]
    Remote(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Socket error not covered above.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_magic() {
        let err = TransportError::InvalidMagic {
            expected: 0x4C4B0001,
            got: 0xDEADBEEF,
        };
        assert_eq!(
            err.to_string(),
            "invalid magic number: expected 0x4C4B0001, got 0xDEADBEEF"
        );
    }

    #[test]
    fn test_display_unknown_opcode() {
        assert_eq!(
            TransportError::UnknownOpcode(0x0abc).to_string(),
            "unknown opcode: 0x0ABC"
        );
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let err: TransportError = io.into();
        assert!(matches!(err, TransportError::IoError(_)));
    }
}
