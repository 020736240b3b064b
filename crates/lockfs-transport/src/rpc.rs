//! RPC layer providing request/response semantics over TCP connections.

use crate::error::{Result, TransportError};
use crate::metrics::{Counter, TransportMetrics};
use crate::protocol::{Frame, FrameFlags, Opcode};
use crate::tcp::{self, FrameReader, FrameWriter, TcpConfig};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Configuration for RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Response timeout in milliseconds (default: 5000).
    pub response_timeout_ms: u64,
    /// Underlying TCP settings.
    pub tcp: TcpConfig,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5000,
            tcp: TcpConfig::default(),
        }
    }
}

/// Trait for handling incoming RPC requests.
pub trait RpcHandler: Send + Sync + 'static {
    /// Handle a request and return the response payload bytes.
    fn handle(&self, request: Frame) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + '_>>;
}

#[derive(Default)]
struct PendingCalls {
    waiters: HashMap<u64, oneshot::Sender<Frame>>,
    closed: bool,
}

/// RPC client for sending requests and receiving responses.
///
/// Many calls may be in flight on one connection; responses are matched to
/// callers by request id.
pub struct RpcClient {
    writer: Arc<FrameWriter>,
    config: RpcClientConfig,
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingCalls>>,
    metrics: Arc<TransportMetrics>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl RpcClient {
    /// Connect to `addr` and start the response reader.
    pub async fn connect(addr: &str, config: RpcClientConfig) -> Result<Self> {
        let (reader, writer) = tcp::dial(addr, &config.tcp).await?;
        let client = Self::new(reader, writer, config);
        client.metrics.record(Counter::ConnectionsOpened);
        Ok(client)
    }

    /// Build a client over an already split connection. The reader moves
    /// into a background task that routes responses to their callers.
    pub fn new(mut reader: FrameReader, writer: FrameWriter, config: RpcClientConfig) -> Self {
        let pending: Arc<Mutex<PendingCalls>> = Arc::new(Mutex::new(PendingCalls::default()));
        let metrics = Arc::new(TransportMetrics::new());
        let reader_pending = pending.clone();
        let reader_metrics = metrics.clone();
        let handle = tokio::spawn(async move {
            loop {
                match reader.next_frame().await {
                    Ok(frame) => {
                        reader_metrics.record(Counter::ResponsesReceived);
                        let request_id = frame.request_id();
                        let mut calls = reader_pending.lock().await;
                        if let Some(tx) = calls.waiters.remove(&request_id) {
                            let _ = tx.send(frame);
                        }
                    }
                    Err(e) => {
                        debug!(peer = %reader.peer_addr(), error = %e, "RPC reader stopping");
                        let mut calls = reader_pending.lock().await;
                        calls.closed = true;
                        // Dropping the senders fails every outstanding call.
                        calls.waiters.clear();
                        break;
                    }
                }
            }
        });
        Self {
            writer: Arc::new(writer),
            config,
            next_id: AtomicU64::new(1),
            pending,
            metrics,
            reader_handle: handle,
        }
    }

    /// Send a request and wait up to the configured response timeout.
    pub async fn call(&self, opcode: Opcode, payload: Vec<u8>) -> Result<Frame> {
        let limit = Duration::from_millis(self.config.response_timeout_ms);
        self.call_with_timeout(opcode, payload, Some(limit)).await
    }

    /// Send a request with an explicit response limit.
    ///
    /// `None` waits until the response arrives or the connection fails. Use
    /// it for requests the server may legitimately park, where giving up on
    /// the client would strand whatever the server later hands back.
    pub async fn call_with_timeout(
        &self,
        opcode: Opcode,
        payload: Vec<u8>,
        limit: Option<Duration>,
    ) -> Result<Frame> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::new(opcode, request_id, payload);
        let (tx, rx) = oneshot::channel();
        {
            let mut calls = self.pending.lock().await;
            if calls.closed {
                return Err(TransportError::ConnectionReset);
            }
            calls.waiters.insert(request_id, tx);
        }
        self.metrics.record(Counter::RequestsSent);
        if let Err(e) = self.writer.write_frame(&frame).await {
            self.pending.lock().await.waiters.remove(&request_id);
            self.metrics.record(Counter::Errors);
            return Err(e);
        }

        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().await.waiters.remove(&request_id);
                    self.metrics.record(Counter::Timeouts);
                    return Err(TransportError::RequestTimeout {
                        request_id,
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };
        match outcome {
            Ok(response) if response.is_error() => {
                self.metrics.record(Counter::Errors);
                Err(TransportError::Remote(
                    String::from_utf8_lossy(&response.payload).into_owned(),
                ))
            }
            Ok(response) => Ok(response),
            Err(_) => {
                self.metrics.record(Counter::Errors);
                Err(TransportError::ConnectionReset)
            }
        }
    }

    /// Send a fire-and-forget message (no response expected).
    pub async fn call_one_way(&self, opcode: Opcode, payload: Vec<u8>) -> Result<()> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut frame = Frame::new(opcode, request_id, payload);
        frame.header.flags = FrameFlags::ONE_WAY;
        self.metrics.record(Counter::RequestsSent);
        self.writer.write_frame(&frame).await
    }

    /// True once the connection has failed; a closed client never recovers.
    pub async fn is_closed(&self) -> bool {
        self.pending.lock().await.closed
    }

    /// Address of the server this client talks to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.writer.peer_addr()
    }

    /// Counters for this client's connection.
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Shutdown the RPC client.
    pub fn shutdown(&self) {
        self.reader_handle.abort();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// RPC server that dispatches requests to a handler.
pub struct RpcServer;

impl RpcServer {
    /// Run the server accept loop. Spawns a task per connection, and a task
    /// per request so a slow handler never blocks its connection.
    pub async fn serve(listener: tokio::net::TcpListener, handler: Arc<dyn RpcHandler>) -> Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await.map_err(TransportError::IoError)?;
            debug!(peer = %peer_addr, "Accepted connection");
            let handler = handler.clone();
            tokio::spawn(async move {
                let (mut reader, writer) = match tcp::split(stream, true) {
                    Ok(halves) => halves,
                    Err(e) => {
                        warn!(peer = %peer_addr, error = %e, "Failed to set up connection");
                        return;
                    }
                };
                let writer = Arc::new(writer);
                loop {
                    let frame = match reader.next_frame().await {
                        Ok(f) => f,
                        Err(e) => {
                            debug!(peer = %peer_addr, error = %e, "Connection closed");
                            break;
                        }
                    };
                    if frame.is_response() {
                        debug!(request_id = frame.request_id(), "Ignoring stray response frame");
                        continue;
                    }
                    let handler = handler.clone();
                    let writer = writer.clone();
                    tokio::spawn(async move {
                        Self::dispatch(handler, writer, frame).await;
                    });
                }
            });
        }
    }

    /// Spawn [`RpcServer::serve`] on the runtime.
    pub fn spawn(
        listener: tokio::net::TcpListener,
        handler: Arc<dyn RpcHandler>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = Self::serve(listener, handler).await {
                warn!(error = %e, "RPC server stopped");
            }
        })
    }

    async fn dispatch(handler: Arc<dyn RpcHandler>, writer: Arc<FrameWriter>, frame: Frame) {
        let is_one_way = frame.header.flags.contains(FrameFlags::ONE_WAY);
        let opcode = frame.opcode();
        let request = frame.clone();
        let response = match handler.handle(frame).await {
            Ok(payload) => request.make_response(payload),
            Err(e) => {
                warn!(?opcode, error = %e, "Handler error");
                request.make_error(&e.to_string())
            }
        };
        if is_one_way {
            return;
        }
        if let Err(e) = writer.write_frame(&response).await {
            warn!(error = %e, "Failed to send response");
        }
    }
}
