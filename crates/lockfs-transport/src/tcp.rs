//! Frame I/O over TCP.
//!
//! A stream is split once. Its single reader owns the read half outright;
//! writers share the write half behind an async mutex so frames from
//! concurrent requests never interleave on the wire.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameHeader, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Socket settings for outbound connections.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Give up dialing after this long.
    pub connect_timeout_ms: u64,
    /// Disable Nagle; lock traffic is small request/response pairs.
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
        }
    }
}

/// Connect to `addr` and split the stream into frame halves.
pub async fn dial(addr: &str, config: &TcpConfig) -> Result<(FrameReader, FrameWriter)> {
    let limit = Duration::from_millis(config.connect_timeout_ms);
    let stream = match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(stream) => stream?,
        Err(_) => {
            return Err(TransportError::ConnectionTimeout {
                addr: addr.to_string(),
                timeout_ms: config.connect_timeout_ms,
            })
        }
    };
    debug!(peer = addr, "dialed");
    split(stream, config.nodelay)
}

/// Split an established stream into frame halves.
pub fn split(stream: TcpStream, nodelay: bool) -> Result<(FrameReader, FrameWriter)> {
    stream.set_nodelay(nodelay)?;
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();
    Ok((
        FrameReader {
            inner: BufReader::new(read),
            peer,
        },
        FrameWriter {
            inner: Mutex::new(write),
            peer,
        },
    ))
}

/// Receiving half of a connection.
pub struct FrameReader {
    inner: BufReader<OwnedReadHalf>,
    peer: SocketAddr,
}

impl FrameReader {
    /// Read and verify the next frame.
    ///
    /// A peer that hangs up, cleanly or mid-frame, yields `ConnectionReset`.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.inner.read_exact(&mut header).await.map_err(hangup_as_reset)?;
        let header = FrameHeader::decode(&header)?;
        if header.payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let mut payload = vec![0u8; header.payload_length as usize];
        self.inner.read_exact(&mut payload).await.map_err(hangup_as_reset)?;
        let frame = Frame { header, payload };
        frame.validate()?;
        Ok(frame)
    }

    /// Remote end of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Sending half of a connection, shareable between tasks.
pub struct FrameWriter {
    inner: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl FrameWriter {
    /// Write one whole frame.
    pub async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        let mut half = self.inner.lock().await;
        half.write_all(&bytes).await.map_err(hangup_as_reset)?;
        Ok(())
    }

    /// Remote end of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

fn hangup_as_reset(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            TransportError::ConnectionReset
        }
        _ => TransportError::IoError(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameFlags, Opcode};
    use tokio::net::TcpListener;

    async fn pair() -> ((FrameReader, FrameWriter), TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let halves = dial(&addr, &TcpConfig::default()).await.unwrap();
        (halves, accept.await.unwrap())
    }

    #[tokio::test]
    async fn test_frames_cross_the_wire() {
        let ((mut reader, writer), server) = pair().await;
        let (mut server_reader, server_writer) = split(server, true).unwrap();
        assert_eq!(server_writer.peer_addr(), server_reader.peer_addr());
        assert_eq!(reader.peer_addr(), writer.peer_addr());

        writer
            .write_frame(&Frame::new(Opcode::Acquire, 7, b"lock 7".to_vec()))
            .await
            .unwrap();
        let request = server_reader.next_frame().await.unwrap();
        assert_eq!(request.opcode(), Opcode::Acquire);
        assert_eq!(request.payload, b"lock 7");

        server_writer
            .write_frame(&request.make_response(b"granted".to_vec()))
            .await
            .unwrap();
        let response = reader.next_frame().await.unwrap();
        assert!(response.is_response());
        assert_eq!(response.request_id(), 7);
        assert_eq!(response.payload, b"granted");
    }

    #[tokio::test]
    async fn test_hangup_reads_as_reset() {
        let ((mut reader, _writer), server) = pair().await;
        drop(server);
        assert!(matches!(
            reader.next_frame().await,
            Err(TransportError::ConnectionReset)
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let ((mut reader, _writer), mut server) = pair().await;
        let header = FrameHeader::new(Opcode::Stat, 1, MAX_PAYLOAD_SIZE + 1, FrameFlags::RESPONSE);
        server.write_all(&header.encode()).await.unwrap();
        assert!(matches!(
            reader.next_frame().await,
            Err(TransportError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_payload_rejected() {
        let ((mut reader, _writer), mut server) = pair().await;
        let mut bytes = Frame::new(Opcode::Retry, 3, b"abc".to_vec()).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        server.write_all(&bytes).await.unwrap();
        assert!(matches!(
            reader.next_frame().await,
            Err(TransportError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(dial(&addr, &TcpConfig::default()).await.is_err());
    }
}
