/// MC protocol PLC simulator
///
/// This module provides a TCP server that answers MC 3E/4E binary batch
/// read/write requests from an in-memory `DeviceMemory`. It is meant for
/// tests and demos; only the word-unit batch commands are implemented.

use async_trait::async_trait;
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use log::{info, error, debug, warn};

use crate::codec::FrameBuffer;
use crate::device::{ControllerSeries, DeviceAddress};
use crate::device_memory::{DeviceMemory, DeviceMemoryStats};
use crate::error::{McError, McResult};
use crate::frame::{Command, FrameVariant, SUBHEADER_WIDTH, TIMER_WIDTH};
use crate::response::decode_words;
use crate::{DEFAULT_MC_PORT, MAX_WORDS_PER_REQUEST};

/// Read size per socket read
const READ_CHUNK_SIZE: usize = 2048;

/// Number of points out of range
pub const END_CODE_BAD_COUNT: u16 = 0xC051;
/// Device reference cannot be decoded or is not supported
pub const END_CODE_BAD_DEVICE: u16 = 0xC056;
/// Command or subcommand not supported
pub const END_CODE_UNSUPPORTED: u16 = 0xC059;
/// Request data length does not match the number of points
pub const END_CODE_LENGTH_MISMATCH: u16 = 0xC061;

/// MC server trait
#[async_trait]
pub trait McServer: Send + Sync {
    /// Start the server
    async fn start(&mut self) -> McResult<()>;

    /// Stop the server
    async fn stop(&mut self) -> McResult<()>;

    /// Check if server is running
    fn is_running(&self) -> bool;

    /// Get server statistics
    fn get_stats(&self) -> ServerStats;

    /// Get device memory reference
    fn get_device_memory(&self) -> Arc<DeviceMemory>;
}

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections_count: u64,
    pub active_connections: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Requests answered with a non-zero end code
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
    pub device_memory_stats: Option<DeviceMemoryStats>,
}

type SharedServerStats = Arc<Mutex<ServerStats>>;

fn lock_stats(stats: &SharedServerStats) -> MutexGuard<'_, ServerStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MC TCP server configuration
#[derive(Debug, Clone)]
pub struct McTcpServerConfig {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    /// Idle time after which a silent client is dropped
    pub request_timeout: Duration,
    pub device_memory: Option<Arc<DeviceMemory>>,
}

impl Default for McTcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_MC_PORT)),
            max_connections: 16,
            request_timeout: Duration::from_secs(30),
            device_memory: None,
        }
    }
}

/// MC TCP server implementation
pub struct McTcpServer {
    config: McTcpServerConfig,
    device_memory: Arc<DeviceMemory>,
    stats: SharedServerStats,
    shutdown_tx: Option<broadcast::Sender<()>>,
    is_running: Arc<AtomicBool>,
    start_time: Option<Instant>,
    local_addr: Option<SocketAddr>,
}

impl McTcpServer {
    /// Create a new TCP server with default configuration
    pub fn new(bind_address: &str) -> McResult<Self> {
        let addr = bind_address
            .parse()
            .map_err(|e| McError::configuration(format!("Invalid bind address: {}", e)))?;

        Self::with_config(McTcpServerConfig {
            bind_address: addr,
            ..Default::default()
        })
    }

    /// Create a new TCP server with custom configuration
    pub fn with_config(config: McTcpServerConfig) -> McResult<Self> {
        if config.max_connections == 0 {
            return Err(McError::configuration("max_connections must be greater than zero"));
        }
        let device_memory = config
            .device_memory
            .clone()
            .unwrap_or_else(|| Arc::new(DeviceMemory::new()));

        Ok(Self {
            config,
            device_memory,
            stats: SharedServerStats::default(),
            shutdown_tx: None,
            is_running: Arc::new(AtomicBool::new(false)),
            start_time: None,
            local_addr: None,
        })
    }

    /// Address the listener is bound to, once started
    ///
    /// Differs from the configured address when binding to port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Handle client connection
    async fn handle_client(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        device_memory: Arc<DeviceMemory>,
        stats: SharedServerStats,
        mut shutdown_rx: broadcast::Receiver<()>,
        request_timeout: Duration,
    ) {
        info!("📡 New client connected: {}", peer_addr);
        {
            let mut stats = lock_stats(&stats);
            stats.connections_count += 1;
            stats.active_connections += 1;
        }

        let mut requests = RequestStream::default();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        'session: loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received for client {}", peer_addr);
                    break;
                }

                result = timeout(request_timeout, stream.read(&mut chunk)) => {
                    let bytes_read = match result {
                        Ok(Ok(0)) => {
                            debug!("Client {} closed the connection", peer_addr);
                            break;
                        }
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => {
                            error!("Read error from {}: {}", peer_addr, e);
                            break;
                        }
                        Err(_) => {
                            warn!("Client {} idle for {:?}, closing", peer_addr, request_timeout);
                            break;
                        }
                    };
                    lock_stats(&stats).bytes_received += bytes_read as u64;

                    let frames = match requests.push(&chunk[..bytes_read]) {
                        Ok(frames) => frames,
                        Err(e) => {
                            error!("Dropping client {}: {}", peer_addr, e);
                            break;
                        }
                    };

                    for frame in frames {
                        let response = match Self::process_request(&frame, &device_memory) {
                            Ok(response) => response,
                            Err(e) => {
                                error!("Unusable request from {}: {}", peer_addr, e);
                                break 'session;
                            }
                        };

                        {
                            let mut stats = lock_stats(&stats);
                            stats.total_requests += 1;
                            stats.bytes_sent += response.frame.len() as u64;
                            if response.end_code == 0 {
                                stats.successful_requests += 1;
                            } else {
                                stats.failed_requests += 1;
                            }
                        }

                        if let Err(e) = stream.write_all(&response.frame).await {
                            error!("Failed to send response to {}: {}", peer_addr, e);
                            break 'session;
                        }
                    }
                }
            }
        }

        lock_stats(&stats).active_connections -= 1;
        info!("🔌 Client {} disconnected", peer_addr);
    }

    /// Answer one complete request frame
    ///
    /// Fails only when the frame header itself is unusable; command level
    /// problems are reported to the client as end codes.
    fn process_request(frame: &[u8], device_memory: &DeviceMemory) -> McResult<SimulatedResponse> {
        if frame.len() < SUBHEADER_WIDTH {
            return Err(McError::malformed("Frame too short"));
        }
        let subheader = u16::from_be_bytes([frame[0], frame[1]]);
        let variant = FrameVariant::from_request_subheader(subheader)
            .ok_or_else(|| McError::invalid_subheader(FrameVariant::Mc3E.request_subheader(), subheader))?;

        let body_start = variant.header_len() + TIMER_WIDTH;
        if frame.len() < body_start + 4 {
            return Err(McError::malformed("Request has no command"));
        }

        // serial, reserved and route fields are echoed back unchanged
        let route = &frame[SUBHEADER_WIDTH..variant.length_offset()];
        let body = &frame[body_start..];
        let command = LittleEndian::read_u16(&body[0..2]);
        let subcommand = LittleEndian::read_u16(&body[2..4]);

        debug!(
            "Processing {} request: command=0x{:04X}, subcommand=0x{:04X}",
            variant, command, subcommand
        );

        let (end_code, payload) = match Self::execute(command, subcommand, &body[4..], device_memory) {
            Ok(payload) => (0, payload),
            Err(end_code) => {
                // error information: request route without serial, then command and subcommand
                let mut info = route[route.len() - 5..].to_vec();
                info.extend_from_slice(&body[0..4]);
                (end_code, info)
            }
        };

        Ok(SimulatedResponse {
            end_code,
            frame: Self::build_response(variant, route, end_code, &payload),
        })
    }

    /// Execute a command against device memory, returning payload or end code
    fn execute(command: u16, subcommand: u16, data: &[u8], device_memory: &DeviceMemory) -> Result<Vec<u8>, u16> {
        let series = match subcommand {
            0x0000 => ControllerSeries::Q,
            0x0002 => ControllerSeries::IqR,
            _ => return Err(END_CODE_UNSUPPORTED),
        };
        let command = Command::from_u16(command).ok_or(END_CODE_UNSUPPORTED)?;

        let width = series.address_width();
        if data.len() < width + 2 {
            return Err(END_CODE_LENGTH_MISMATCH);
        }
        let address = DeviceAddress::decode(&data[..width], series).map_err(|_| END_CODE_BAD_DEVICE)?;
        let count = LittleEndian::read_u16(&data[width..width + 2]);
        if count == 0 || count as usize > MAX_WORDS_PER_REQUEST {
            return Err(END_CODE_BAD_COUNT);
        }
        let values = &data[width + 2..];

        match command {
            Command::BatchRead => {
                if !values.is_empty() {
                    return Err(END_CODE_LENGTH_MISMATCH);
                }
                let words = device_memory
                    .read_words(address.device, address.offset, count)
                    .map_err(end_code_of)?;
                Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
            }
            Command::BatchWrite => {
                if values.len() != count as usize * 2 {
                    return Err(END_CODE_LENGTH_MISMATCH);
                }
                let words = decode_words(values).map_err(|_| END_CODE_LENGTH_MISMATCH)?;
                device_memory
                    .write_words(address.device, address.offset, &words)
                    .map_err(end_code_of)?;
                Ok(Vec::new())
            }
        }
    }

    /// Build a response frame
    fn build_response(variant: FrameVariant, route: &[u8], end_code: u16, payload: &[u8]) -> Bytes {
        let mut response = BytesMut::with_capacity(variant.payload_offset() + payload.len());
        response.put_u16(variant.response_subheader());
        response.put_slice(route);
        response.put_u16_le((2 + payload.len()) as u16);
        response.put_u16_le(end_code);
        response.put_slice(payload);
        response.freeze()
    }
}

fn end_code_of(err: McError) -> u16 {
    err.plc_code().unwrap_or(END_CODE_BAD_DEVICE)
}

struct SimulatedResponse {
    end_code: u16,
    frame: Bytes,
}

/// Reassembles requests; the frame variant is taken from the first subheader
#[derive(Default)]
struct RequestStream {
    buffer: Option<FrameBuffer>,
    head: Vec<u8>,
}

impl RequestStream {
    fn push(&mut self, data: &[u8]) -> McResult<Vec<Bytes>> {
        if let Some(buffer) = self.buffer.as_mut() {
            return buffer.push(data);
        }

        self.head.extend_from_slice(data);
        if self.head.len() < SUBHEADER_WIDTH {
            return Ok(Vec::new());
        }
        let subheader = u16::from_be_bytes([self.head[0], self.head[1]]);
        let variant = FrameVariant::from_request_subheader(subheader)
            .ok_or_else(|| McError::invalid_subheader(FrameVariant::Mc3E.request_subheader(), subheader))?;

        let head = std::mem::take(&mut self.head);
        self.buffer.insert(FrameBuffer::new(variant)).push(&head)
    }
}

#[async_trait]
impl McServer for McTcpServer {
    async fn start(&mut self) -> McResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(McError::configuration("Server is already running"));
        }

        info!("🚀 Starting MC TCP server on {}", self.config.bind_address);

        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| McError::connection(format!("Failed to bind to {}: {}", self.config.bind_address, e)))?;
        self.local_addr = listener.local_addr().ok();

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.start_time = Some(Instant::now());
        self.is_running.store(true, Ordering::SeqCst);

        info!("✅ MC TCP server listening on {:?}", self.local_addr);
        info!("   - Max connections: {}", self.config.max_connections);
        info!("   - Idle timeout: {:?}", self.config.request_timeout);

        let device_memory = Arc::clone(&self.device_memory);
        let stats = Arc::clone(&self.stats);
        let request_timeout = self.config.request_timeout;
        let max_connections = self.config.max_connections;
        let is_running_flag = Arc::clone(&self.is_running);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                if lock_stats(&stats).active_connections >= max_connections {
                                    warn!("Rejecting {}: connection limit {} reached", addr, max_connections);
                                    continue;
                                }
                                if let Err(e) = stream.set_nodelay(true) {
                                    debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                                }

                                let device_memory = Arc::clone(&device_memory);
                                let stats = Arc::clone(&stats);
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_client(stream, addr, device_memory, stats, shutdown_rx, request_timeout).await;
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping server");
                        break;
                    }
                }
            }

            is_running_flag.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    async fn stop(&mut self) -> McResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        self.is_running.store(false, Ordering::SeqCst);

        info!("⏹️  MC TCP server stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn get_stats(&self) -> ServerStats {
        let mut stats = lock_stats(&self.stats).clone();
        if let Some(start_time) = self.start_time {
            stats.uptime_seconds = start_time.elapsed().as_secs();
        }
        stats.device_memory_stats = Some(self.device_memory.get_stats());
        stats
    }

    fn get_device_memory(&self) -> Arc<DeviceMemory> {
        Arc::clone(&self.device_memory)
    }
}
