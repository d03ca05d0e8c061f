//! # MC Transport Layer
//!
//! This module owns the byte stream to the PLC. A transport is split into a
//! writer half, guarded by an async mutex that doubles as the request gate,
//! and a background reader task that reassembles response frames and hands
//! them to the connection's correlator.
//!
//! ## Request Flow
//!
//! 1. The caller acquires the writer lock; only one request is outstanding
//!    at a time.
//! 2. The request is registered with the correlator, then written.
//! 3. The reader task decodes the next response frame and completes the
//!    oldest pending request with it.
//! 4. The caller releases the writer lock once its reply arrived.
//!
//! When the stream ends or fails, the reader marks the transport as
//! disconnected and every pending request fails with `ConnectionClosed`.
//! A request timeout, or a request future dropped before its reply, also
//! closes the transport: the unanswered reply would otherwise be matched to
//! the next request.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use voltage_mc::transport::{McTransport, StreamTransport, TransportOptions};
//! use voltage_mc::frame::{FrameBuilder, FrameVariant};
//! use voltage_mc::device::{ControllerSeries, DeviceAddress, DeviceType};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = TransportOptions::new(FrameVariant::Mc3E, Duration::from_secs(5));
//!     let transport = StreamTransport::connect("192.168.3.39", 5000, Duration::from_secs(3), options).await?;
//!
//!     let builder = FrameBuilder::new(FrameVariant::Mc3E, ControllerSeries::Q);
//!     let frame = builder.build_read(&DeviceAddress::with_count(DeviceType::D, 100, 4))?;
//!     let values = transport.request(frame).await?;
//!     println!("D100..D103 = {:?}", values);
//!
//!     let stats = transport.get_stats();
//!     println!("Requests sent: {}", stats.requests_sent);
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::FrameBuffer;
use crate::correlator::Correlator;
use crate::error::{McError, McResult};
use crate::frame::FrameVariant;
use crate::response::decode_response;

/// Size of a single socket read
const READ_CHUNK_SIZE: usize = 2048;

/// Format raw bytes as hex string for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log packet with direction and frame variant
fn log_packet(direction: &str, data: &[u8], variant: FrameVariant) {
    info!("[MC-{}] {} {}", variant, direction, format_hex_packet(data));
}

/// Transport layer abstraction for MC communication
///
/// Implementations must be `Send + Sync`; requests are issued through `&self`
/// and serialized internally.
#[async_trait]
pub trait McTransport: Send + Sync {
    /// Send a complete request frame and wait for its decoded reply
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the stream closed before or while waiting
    /// - `ConnectionError` if the frame could not be written
    /// - `RequestTimeout` if no response arrived in time
    /// - Any validation error produced while decoding the response
    async fn request(&self, frame: Bytes) -> McResult<Vec<i16>>;

    /// Check if the stream is still open
    fn is_connected(&self) -> bool;

    /// Close the stream; pending requests fail with `ConnectionClosed`
    async fn close(&self) -> McResult<()>;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;

    /// Number of requests awaiting a response
    fn pending_requests(&self) -> usize;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Response frames that arrived with no request pending
    pub discarded_frames: u64,
}

/// Statistics shared between the reader task and request callers
pub type SharedStats = Arc<Mutex<TransportStats>>;

fn lock_stats(stats: &SharedStats) -> MutexGuard<'_, TransportStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-connection transport settings
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub variant: FrameVariant,
    pub request_timeout: Duration,
    pub packet_logging: bool,
}

impl TransportOptions {
    pub fn new(variant: FrameVariant, request_timeout: Duration) -> Self {
        Self {
            variant,
            request_timeout,
            packet_logging: false,
        }
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// MC transport over any async byte stream
///
/// Used with `TcpStream` in production and with in-memory duplex streams in
/// tests.
pub struct StreamTransport {
    /// Request gate; held from registration until the reply arrives
    writer: tokio::sync::Mutex<BoxedWriter>,
    correlator: Correlator,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    stats: SharedStats,
    options: TransportOptions,
    peer: String,
}

impl StreamTransport {
    /// Open a TCP connection to the PLC
    ///
    /// # Errors
    ///
    /// `ConnectionTimeout` when the connection is not established within
    /// `connect_timeout`, `ConnectionError` when it is refused or fails.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        options: TransportOptions,
    ) -> McResult<Self> {
        let stream = connect_tcp(host, port, connect_timeout).await?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("{}:{}", host, port));
        Ok(Self::new(stream, peer, options, SharedStats::default()))
    }

    /// Wrap an already open stream
    ///
    /// Spawns the reader task, so this must run inside a Tokio runtime.
    pub fn new<S>(stream: S, peer: impl Into<String>, options: TransportOptions, stats: SharedStats) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let correlator = Correlator::new();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            read_half,
            ReaderContext {
                variant: options.variant,
                correlator: correlator.clone(),
                connected: Arc::clone(&connected),
                stats: Arc::clone(&stats),
                packet_logging: options.packet_logging,
                peer: peer.clone(),
            },
        ));

        debug!(peer = %peer, variant = %options.variant, "transport attached");

        Self {
            writer: tokio::sync::Mutex::new(Box::new(write_half)),
            correlator,
            connected,
            reader,
            stats,
            options,
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.options.packet_logging = enabled;
    }

    /// Mark the transport closed and fail everything pending
    fn tear_down(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.correlator.abort_all(McError::connection_closed(reason));
    }

    fn record_failure(&self, err: &McError) {
        let mut stats = lock_stats(&self.stats);
        stats.errors += 1;
        if matches!(err, McError::RequestTimeout { .. }) {
            stats.timeouts += 1;
        }
    }
}

#[async_trait]
impl McTransport for StreamTransport {
    async fn request(&self, frame: Bytes) -> McResult<Vec<i16>> {
        let mut writer = self.writer.lock().await;
        if !self.is_connected() {
            return Err(McError::connection_closed("connection is closed"));
        }

        let (request_id, reply) = self.correlator.register(self.options.request_timeout)?;
        let mut in_flight = InFlight { transport: self, settled: false };
        {
            let mut stats = lock_stats(&self.stats);
            stats.requests_sent += 1;
            stats.bytes_sent += frame.len() as u64;
        }
        if self.options.packet_logging {
            log_packet("send", &frame, self.options.variant);
        }

        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!(peer = %self.peer, request_id, error = %e, "write failed, closing connection");
            let err = McError::connection(format!("Failed to send request to {}: {}", self.peer, e));
            self.record_failure(&err);
            self.tear_down("write failed");
            in_flight.settled = true;
            return Err(err);
        }

        let result = match reply.await {
            Ok(result) => result,
            Err(_) => Err(McError::connection_closed("request abandoned")),
        };
        in_flight.settled = true;

        if let Err(err) = &result {
            self.record_failure(err);
            if matches!(err, McError::RequestTimeout { .. }) {
                // the late reply would be matched to the next request
                warn!(peer = %self.peer, request_id, "request timed out, closing connection");
                self.tear_down("request timed out");
            }
        }
        drop(writer);
        result
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> McResult<()> {
        self.tear_down("connection closed by client");
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "shutdown after close failed");
        }
        info!(peer = %self.peer, "connection closed");
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        lock_stats(&self.stats).clone()
    }

    fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.tear_down("transport dropped");
    }
}

/// Tears the connection down when a caller drops a request future before
/// its reply was settled; the unanswered frame would desync the FIFO.
struct InFlight<'a> {
    transport: &'a StreamTransport,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(peer = %self.transport.peer, "request abandoned while in flight, closing connection");
            self.transport.tear_down("request abandoned while in flight");
        }
    }
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Open a TCP stream with a connect timeout and Nagle disabled
pub async fn connect_tcp(host: &str, port: u16, connect_timeout: Duration) -> McResult<TcpStream> {
    let address = format!("{}:{}", host, port);
    debug!(address = %address, timeout_ms = connect_timeout.as_millis() as u64, "connecting");

    let stream = match timeout(connect_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(McError::connection(format!("Failed to connect to {}: {}", address, e)));
        }
        Err(_) => {
            return Err(McError::connection_timeout(address, connect_timeout.as_millis() as u64));
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        warn!(address = %address, error = %e, "failed to set TCP_NODELAY");
    }
    info!(address = %address, "connected");
    Ok(stream)
}

struct ReaderContext {
    variant: FrameVariant,
    correlator: Correlator,
    connected: Arc<AtomicBool>,
    stats: SharedStats,
    packet_logging: bool,
    peer: String,
}

/// Reader task: reassemble frames and deliver them in arrival order
async fn read_loop<R>(mut reader: R, ctx: ReaderContext)
where
    R: AsyncRead + Send + Unpin,
{
    let mut buffer = FrameBuffer::new(ctx.variant);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    let reason = 'read: loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break "connection closed by peer".to_string(),
            Ok(n) => n,
            Err(e) => break format!("read error: {}", e),
        };
        lock_stats(&ctx.stats).bytes_received += n as u64;
        buffer.extend(&chunk[..n]);

        // frames ahead of a corrupt header are still delivered
        loop {
            let frame = match buffer.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => break 'read format!("stream out of sync: {}", e),
            };
            if ctx.packet_logging {
                log_packet("receive", &frame, ctx.variant);
            }
            let result = decode_response(&frame, ctx.variant);
            lock_stats(&ctx.stats).responses_received += 1;
            if !ctx.correlator.complete(result) {
                lock_stats(&ctx.stats).discarded_frames += 1;
            }
        }
    };

    ctx.connected.store(false, Ordering::SeqCst);
    buffer.clear();
    let aborted = ctx.correlator.abort_all(McError::connection_closed(reason.clone()));
    info!(peer = %ctx.peer, reason = %reason, aborted, "reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn options() -> TransportOptions {
        TransportOptions::new(FrameVariant::Mc3E, Duration::from_millis(500))
    }

    #[test]
    fn test_format_hex_packet() {
        assert_eq!(format_hex_packet(&[0x50, 0x00, 0xFF]), "50 00 FF");
        assert_eq!(format_hex_packet(&[]), "");
    }

    #[tokio::test]
    async fn test_request_resolved_by_reader() {
        let (client, mut plc) = duplex(1024);
        let transport = StreamTransport::new(client, "duplex", options(), SharedStats::default());

        let plc_side = async {
            let mut request = [0u8; 4];
            plc.read_exact(&mut request).await.unwrap();
            plc.write_all(&[0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x07, 0x00])
                .await
                .unwrap();
        };
        let (result, _) = tokio::join!(
            transport.request(Bytes::from_static(&[0x50, 0x00, 0x00, 0xFF])),
            plc_side
        );

        assert_eq!(result.unwrap(), vec![7]);
        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_sent, 4);
        assert_eq!(stats.bytes_received, 13);
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let (client, plc) = duplex(64);
        let transport = StreamTransport::new(client, "duplex", options(), SharedStats::default());
        assert!(transport.is_connected());

        drop(plc);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!transport.is_connected());

        let err = transport.request(Bytes::from_static(&[0x50, 0x00])).await.unwrap_err();
        assert!(matches!(err, McError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_closes_connection() {
        let (client, mut plc) = duplex(1024);
        let options = TransportOptions::new(FrameVariant::Mc3E, Duration::from_millis(100));
        let transport = StreamTransport::new(client, "duplex", options, SharedStats::default());

        let plc_side = async {
            let mut request = [0u8; 2];
            plc.read_exact(&mut request).await.unwrap();
        };
        let (result, _) = tokio::join!(transport.request(Bytes::from_static(&[0x50, 0x00])), plc_side);

        assert!(matches!(result, Err(McError::RequestTimeout { .. })));
        assert!(!transport.is_connected());
        assert_eq!(transport.pending_requests(), 0);
        assert_eq!(transport.get_stats().timeouts, 1);

        let err = transport.request(Bytes::from_static(&[0x50, 0x00])).await.unwrap_err();
        assert!(matches!(err, McError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_dropped_request_closes_connection() {
        let (client, mut plc) = duplex(1024);
        let transport = StreamTransport::new(client, "duplex", options(), SharedStats::default());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            transport.request(Bytes::from_static(&[0x50, 0x00])),
        )
        .await;
        assert!(abandoned.is_err());

        let mut request = [0u8; 2];
        plc.read_exact(&mut request).await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_reply_ahead_of_corrupt_header_delivered() {
        let (client, mut plc) = duplex(1024);
        let transport = StreamTransport::new(client, "duplex", options(), SharedStats::default());

        let plc_side = async {
            let mut request = [0u8; 2];
            plc.read_exact(&mut request).await.unwrap();
            let mut chunk = vec![0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x07, 0x00];
            // next header declares 0xFFFF bytes of data
            chunk.extend_from_slice(&[0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0xFF, 0xFF]);
            plc.write_all(&chunk).await.unwrap();
        };
        let (result, _) = tokio::join!(transport.request(Bytes::from_static(&[0x50, 0x00])), plc_side);

        assert_eq!(result.unwrap(), vec![7]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_tcp("127.0.0.1", port, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, McError::ConnectionError { .. }));
    }
}
