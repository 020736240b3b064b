//! Binary frame protocol for the lock service.
//!
//! Every message travels as one frame: a fixed 24-byte header followed by
//! an opaque payload. Lock requests flow client → server, revoke/retry
//! callbacks flow server → client over a separate connection.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, TransportError};

/// Frame header size in bytes (magic:4 + version:1 + flags:1 + opcode:2 + request_id:8 + payload_length:4 + checksum:4)
pub const FRAME_HEADER_SIZE: usize = 24;

/// Protocol magic number for frame validation
pub const MAGIC: u32 = 0x4C4B_0001;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload accepted on the wire (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Operations carried by the RPC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client asks the server for a lock.
    Acquire = 0x0101,
    /// Client hands a lock back to the server.
    Release = 0x0102,
    /// Diagnostic counter query.
    Stat = 0x0103,
    /// Server asks the current holder to give a lock back.
    Revoke = 0x0201,
    /// Server tells a queued client it now owns a lock.
    Retry = 0x0202,
}

impl Opcode {
    /// True for opcodes delivered to a client's callback endpoint.
    pub fn is_callback(self) -> bool {
        matches!(self, Opcode::Revoke | Opcode::Retry)
    }
}

impl TryFrom<u16> for Opcode {
    type Error = TransportError;

    fn try_from(raw: u16) -> Result<Self> {
        match raw {
            0x0101 => Ok(Opcode::Acquire),
            0x0102 => Ok(Opcode::Release),
            0x0103 => Ok(Opcode::Stat),
            0x0201 => Ok(Opcode::Revoke),
            0x0202 => Ok(Opcode::Retry),
            other => Err(TransportError::UnknownOpcode(other)),
        }
    }
}

/// Frame flags for protocol control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Frame answers an earlier request.
    pub const RESPONSE: FrameFlags = FrameFlags(0x01);
    /// One-way message (no response expected).
    pub const ONE_WAY: FrameFlags = FrameFlags(0x02);
    /// Response payload is an error message, not a result.
    pub const ERROR: FrameFlags = FrameFlags(0x04);

    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Convert to raw byte representation
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Create from raw byte representation
    pub fn from_u8(b: u8) -> Self {
        FrameFlags(b)
    }

    /// True if every bit in `other` is set.
    pub fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    pub fn with(self, other: FrameFlags) -> Self {
        FrameFlags(self.0 | other.0)
    }
}

/// Frame header containing metadata about the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic number
    pub magic: u32,
    /// Protocol version
    pub version: u8,
    /// Control flags
    pub flags: FrameFlags,
    /// Operation code
    pub opcode: Opcode,
    /// Request ID for multiplexing
    pub request_id: u64,
    /// Payload length in bytes
    pub payload_length: u32,
    /// CRC32 checksum of payload
    pub checksum: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(opcode: Opcode, request_id: u64, payload_length: u32, flags: FrameFlags) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            flags,
            opcode,
            request_id,
            payload_length,
            checksum: 0,
        }
    }

    /// Serialize to the fixed 24-byte wire layout (big endian).
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        let mut out = &mut buf[..];
        out.put_u32(self.magic);
        out.put_u8(self.version);
        out.put_u8(self.flags.as_u8());
        out.put_u16(self.opcode as u16);
        out.put_u64(self.request_id);
        out.put_u32(self.payload_length);
        out.put_u32(self.checksum);
        buf
    }

    /// Parse a header, checking magic and version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(TransportError::InvalidFrame {
                reason: format!("header needs {} bytes, got {}", FRAME_HEADER_SIZE, bytes.len()),
            });
        }
        let mut buf = &bytes[..FRAME_HEADER_SIZE];
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let flags = FrameFlags::from_u8(buf.get_u8());
        let opcode = Opcode::try_from(buf.get_u16())?;
        let request_id = buf.get_u64();
        let payload_length = buf.get_u32();
        let checksum = buf.get_u32();
        Ok(Self {
            magic,
            version,
            flags,
            opcode,
            request_id,
            payload_length,
            checksum,
        })
    }
}

/// A single frame in the RPC protocol
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Payload data
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new request frame; the checksum is computed here.
    pub fn new(opcode: Opcode, request_id: u64, payload: Vec<u8>) -> Self {
        let mut header =
            FrameHeader::new(opcode, request_id, payload.len() as u32, FrameFlags::empty());
        header.checksum = crc32fast::hash(&payload);
        Self { header, payload }
    }

    /// Build the response to this frame.
    pub fn make_response(&self, payload: Vec<u8>) -> Frame {
        let mut resp = Frame::new(self.header.opcode, self.header.request_id, payload);
        resp.header.flags = FrameFlags::RESPONSE;
        resp
    }

    /// Build an error response carrying `reason` as its payload.
    pub fn make_error(&self, reason: &str) -> Frame {
        let mut resp = self.make_response(reason.as_bytes().to_vec());
        resp.header.flags = FrameFlags::RESPONSE.with(FrameFlags::ERROR);
        resp
    }

    /// Operation code of this frame.
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Request id used to match responses with requests.
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// True if the frame answers a request.
    pub fn is_response(&self) -> bool {
        self.header.flags.contains(FrameFlags::RESPONSE)
    }

    /// True if the frame is an error response.
    pub fn is_error(&self) -> bool {
        self.header.flags.contains(FrameFlags::ERROR)
    }

    /// Check payload length and checksum against the header.
    pub fn validate(&self) -> Result<()> {
        if self.payload.len() as u32 != self.header.payload_length {
            return Err(TransportError::InvalidFrame {
                reason: format!(
                    "payload length {} does not match header {}",
                    self.payload.len(),
                    self.header.payload_length
                ),
            });
        }
        let computed = crc32fast::hash(&self.payload);
        if computed != self.header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }

    /// Header followed by payload, ready to write to a socket.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Parse a complete frame from a buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::decode(bytes)?;
        if header.payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let end = FRAME_HEADER_SIZE + header.payload_length as usize;
        if bytes.len() < end {
            return Err(TransportError::InvalidFrame {
                reason: format!("truncated payload: need {} bytes, got {}", end, bytes.len()),
            });
        }
        let frame = Frame {
            header,
            payload: bytes[FRAME_HEADER_SIZE..end].to_vec(),
        };
        frame.validate()?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_encode_decode() {
        let frame = Frame::new(Opcode::Acquire, 42, b"lock-7".to_vec());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.opcode(), Opcode::Acquire);
        assert_eq!(decoded.request_id(), 42);
        assert_eq!(decoded.payload, b"lock-7");
        assert!(!decoded.is_response());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Frame::new(Opcode::Stat, 1, Vec::new()).encode();
        bytes[0] = 0xFF;
        match Frame::decode(&bytes) {
            Err(TransportError::InvalidMagic { expected, .. }) => assert_eq!(expected, MAGIC),
            other => panic!("expected InvalidMagic, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = Frame::new(Opcode::Release, 9, b"payload".to_vec()).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(TransportError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut bytes = Frame::new(Opcode::Retry, 3, Vec::new()).encode();
        bytes[6] = 0x7F;
        bytes[7] = 0x7F;
        assert!(matches!(
            Frame::decode(&bytes),
            Err(TransportError::UnknownOpcode(0x7F7F))
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = Frame::new(Opcode::Acquire, 5, b"abcdef".to_vec()).encode();
        assert!(Frame::decode(&bytes[..bytes.len() - 2]).is_err());
        assert!(FrameHeader::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_error_response_flags() {
        let req = Frame::new(Opcode::Revoke, 11, Vec::new());
        let resp = req.make_error("boom");
        assert!(resp.is_response());
        assert!(resp.is_error());
        assert_eq!(resp.request_id(), 11);
        assert_eq!(resp.opcode(), Opcode::Revoke);
        assert_eq!(resp.payload, b"boom");
    }

    #[test]
    fn test_callback_opcodes() {
        assert!(Opcode::Revoke.is_callback());
        assert!(Opcode::Retry.is_callback());
        assert!(!Opcode::Acquire.is_callback());
    }

    proptest! {
        #[test]
        fn prop_header_survives_wire(
            request_id in any::<u64>(),
            flags in 0u8..8,
            payload_length in 0u32..MAX_PAYLOAD_SIZE,
            checksum in any::<u32>(),
        ) {
            let mut header = FrameHeader::new(
                Opcode::Release,
                request_id,
                payload_length,
                FrameFlags::from_u8(flags),
            );
            header.checksum = checksum;
            prop_assert_eq!(FrameHeader::decode(&header.encode()).unwrap(), header);
        }
    }
}
