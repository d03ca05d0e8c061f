/// High-level MC client implementations
///
/// This module provides the protocol engine applications talk to. A client
/// owns one connection, turns register references into request frames,
/// pushes them through the transport one at a time and hands back decoded
/// values keyed by register name.
///
/// Reads and writes are never merged on the wire: every address in a batch
/// is its own round trip, issued in order, and the first failure ends the
/// batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::config::McConfig;
use crate::device::{DeviceAddress, DeviceType};
use crate::error::{McError, McResult};
use crate::frame::{Command, FrameBuilder};
use crate::logging::CallbackLogger;
use crate::transport::{connect_tcp, McTransport, SharedStats, StreamTransport, TransportOptions, TransportStats};
use crate::utils::{OperationTimer, PerformanceMetrics};

/// One value to store with `write_batch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEntry {
    pub device: DeviceType,
    pub offset: u32,
    pub value: i16,
}

impl WriteEntry {
    pub fn new(device: DeviceType, offset: u32, value: i16) -> Self {
        Self { device, offset, value }
    }
}

/// Trait defining the interface for MC client operations
///
/// Implementors provide the word-level primitives; the batch, single
/// register and name-based operations are built on top of them.
#[async_trait]
pub trait PlcClient: Send + Sync {
    /// Open the connection; a no-op when already connected
    async fn connect(&self) -> McResult<()>;

    /// Close the connection; pending requests fail with `ConnectionClosed`
    async fn disconnect(&self) -> McResult<()>;

    fn is_connected(&self) -> bool;

    /// Read `address.count` consecutive words in one request
    async fn read_words(&self, address: &DeviceAddress) -> McResult<Vec<i16>>;

    /// Write consecutive words starting at `device`/`offset` in one request
    async fn write_words(&self, device: DeviceType, offset: u32, values: &[i16]) -> McResult<()>;

    fn get_stats(&self) -> TransportStats;

    /// Read every address, one request each
    ///
    /// The result maps each word's display key (`D100`, `X1F`, ...) to its
    /// value; an address with `count > 1` contributes one key per word.
    async fn read_batch(&self, addresses: &[DeviceAddress]) -> McResult<HashMap<String, i16>> {
        let mut results = HashMap::new();
        for address in addresses {
            let values = self.read_words(address).await?;
            for (index, value) in values.into_iter().enumerate() {
                results.insert(address.key_at(index as u16), value);
            }
        }
        Ok(results)
    }

    /// Write every entry, one request each
    async fn write_batch(&self, entries: &[WriteEntry]) -> McResult<()> {
        for entry in entries {
            self.write_words(entry.device, entry.offset, &[entry.value]).await?;
        }
        Ok(())
    }

    /// Read a single word
    async fn read_register(&self, device: DeviceType, offset: u32) -> McResult<i16> {
        let address = DeviceAddress::new(device, offset);
        let results = self.read_batch(std::slice::from_ref(&address)).await?;
        results
            .get(&address.key())
            .copied()
            .ok_or_else(|| McError::malformed(format!("No value returned for {}", address)))
    }

    /// Write a single word
    async fn write_register(&self, device: DeviceType, offset: u32, value: i16) -> McResult<()> {
        self.write_batch(&[WriteEntry::new(device, offset, value)]).await
    }

    /// Read registers given by name, e.g. `["D0", "X1F"]`
    ///
    /// All names are parsed before anything is sent.
    async fn read_registers(&self, names: &[&str]) -> McResult<HashMap<String, i16>> {
        let addresses = names
            .iter()
            .map(|name| DeviceAddress::parse(name))
            .collect::<McResult<Vec<_>>>()?;
        self.read_batch(&addresses).await
    }
}

/// MC client over TCP (or any attached byte stream)
pub struct McTcpClient {
    config: McConfig,
    builder: FrameBuilder,
    transport: RwLock<Option<Arc<StreamTransport>>>,
    stats: SharedStats,
    metrics: Mutex<PerformanceMetrics>,
    logger: Option<CallbackLogger>,
}

impl std::fmt::Debug for McTcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McTcpClient")
            .field("config", &self.config)
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}

impl McTcpClient {
    /// Create a client; no connection is opened until `connect`
    pub fn new(config: McConfig) -> McResult<Self> {
        config.validate()?;
        let builder = FrameBuilder::with_header(config.frame_variant, config.series, config.frame_header());
        Ok(Self {
            config,
            builder,
            transport: RwLock::new(None),
            stats: SharedStats::default(),
            metrics: Mutex::new(PerformanceMetrics::new()),
            logger: None,
        })
    }

    /// Create a client that reports every request and response to `logger`
    pub fn with_logger(config: McConfig, logger: CallbackLogger) -> McResult<Self> {
        let mut client = Self::new(config)?;
        client.logger = Some(logger);
        Ok(client)
    }

    /// Create a client and connect it
    pub async fn connect_to(config: McConfig) -> McResult<Self> {
        let client = Self::new(config)?;
        client.connect().await?;
        Ok(client)
    }

    pub fn config(&self) -> &McConfig {
        &self.config
    }

    /// Run the protocol over an already open stream
    ///
    /// Any previous connection is closed first.
    pub async fn attach_stream<S>(&self, stream: S) -> McResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = self.config.address();
        self.install(StreamTransport::new(stream, peer, self.transport_options(), Arc::clone(&self.stats)))
            .await;
        Ok(())
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.current().map_or(0, |transport| transport.pending_requests())
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn transport_options(&self) -> TransportOptions {
        TransportOptions::new(self.config.frame_variant, self.config.request_timeout())
            .with_packet_logging(self.config.packet_logging)
    }

    fn current(&self) -> Option<Arc<StreamTransport>> {
        self.transport.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn install(&self, transport: StreamTransport) {
        let previous = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::new(transport));
        if let Some(previous) = previous {
            let _ = previous.close().await;
        }
    }

    /// Send one frame and account for it
    async fn execute(&self, command: Command, address: &DeviceAddress, frame: Bytes) -> McResult<Vec<i16>> {
        let transport = self.current().ok_or(McError::NotConnected)?;

        if let Some(logger) = &self.logger {
            logger.log_request(command, address, &frame);
        }

        let timer = OperationTimer::start(&format!("{} {}", command, address));
        let result = transport.request(frame).await;
        let duration = timer.stop();

        {
            let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            if result.is_ok() {
                metrics.record_success(duration);
            } else {
                metrics.record_failure(duration);
            }
        }
        if let Some(logger) = &self.logger {
            logger.log_response(command, address, &result);
        }
        result
    }
}

#[async_trait]
impl PlcClient for McTcpClient {
    async fn connect(&self) -> McResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let stream = connect_tcp(&self.config.host, self.config.port, self.config.connect_timeout()).await?;
        info!(
            address = %self.config.address(),
            series = %self.config.series,
            variant = %self.config.frame_variant,
            "MC client connected"
        );
        self.attach_stream(stream).await
    }

    async fn disconnect(&self) -> McResult<()> {
        let transport = self.transport.write().unwrap_or_else(PoisonError::into_inner).take();
        match transport {
            Some(transport) => {
                transport.close().await?;
                info!(address = %self.config.address(), "MC client disconnected");
            }
            None => debug!("disconnect called without a connection"),
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.current().map_or(false, |transport| transport.is_connected())
    }

    async fn read_words(&self, address: &DeviceAddress) -> McResult<Vec<i16>> {
        let frame = self.builder.build_read(address)?;
        let values = self.execute(Command::BatchRead, address, frame).await?;
        if values.len() != address.count as usize {
            return Err(McError::malformed(format!(
                "Expected {} words for {}, got {}",
                address.count,
                address,
                values.len()
            )));
        }
        Ok(values)
    }

    async fn write_words(&self, device: DeviceType, offset: u32, values: &[i16]) -> McResult<()> {
        let frame = self.builder.build_write(device, offset, values)?;
        let address = DeviceAddress::with_count(device, offset, values.len() as u16);
        self.execute(Command::BatchWrite, &address, frame).await?;
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn read_response(values: &[i16]) -> Vec<u8> {
        let mut frame = vec![0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00];
        frame.extend_from_slice(&((values.len() * 2 + 2) as u16).to_le_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        for value in values {
            frame.extend_from_slice(&value.to_le_bytes());
        }
        frame
    }

    async fn next_request(plc: &mut DuplexStream) -> Vec<u8> {
        let mut header = [0u8; 9];
        plc.read_exact(&mut header).await.unwrap();
        let length = u16::from_le_bytes([header[7], header[8]]) as usize;
        let mut rest = vec![0u8; length];
        plc.read_exact(&mut rest).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend(rest);
        frame
    }

    #[tokio::test]
    async fn test_not_connected() {
        let client = McTcpClient::new(McConfig::default()).unwrap();
        assert!(!client.is_connected());
        assert_eq!(client.read_register(DeviceType::D, 0).await, Err(McError::NotConnected));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_invalid_names_fail_before_sending() {
        let client = McTcpClient::new(McConfig::default()).unwrap();
        let err = client.read_registers(&["D0", "D1F"]).await.unwrap_err();
        assert!(matches!(err, McError::InvalidAddressFormat { .. }));
    }

    #[tokio::test]
    async fn test_read_batch_expands_counts() {
        let (client_io, mut plc) = duplex(1024);
        let client = McTcpClient::new(McConfig::default()).unwrap();
        client.attach_stream(client_io).await.unwrap();

        let addresses = [
            DeviceAddress::with_count(DeviceType::D, 10, 2),
            DeviceAddress::new(DeviceType::W, 0x1F),
        ];
        let plc_side = async {
            next_request(&mut plc).await;
            plc.write_all(&read_response(&[1, 2])).await.unwrap();
            next_request(&mut plc).await;
            plc.write_all(&read_response(&[-3])).await.unwrap();
        };
        let (result, _) = tokio::join!(client.read_batch(&addresses), plc_side);

        let values = result.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values["D10"], 1);
        assert_eq!(values["D11"], 2);
        assert_eq!(values["W1F"], -3);
        assert_eq!(client.metrics().successful_requests, 2);
    }

    #[tokio::test]
    async fn test_short_read_is_malformed() {
        let (client_io, mut plc) = duplex(1024);
        let client = McTcpClient::new(McConfig::default()).unwrap();
        client.attach_stream(client_io).await.unwrap();

        let plc_side = async {
            next_request(&mut plc).await;
            plc.write_all(&read_response(&[1])).await.unwrap();
        };
        let address = DeviceAddress::with_count(DeviceType::D, 0, 2);
        let (result, _) = tokio::join!(client.read_words(&address), plc_side);
        assert!(matches!(result, Err(McError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client_io, _plc) = duplex(64);
        let client = McTcpClient::new(McConfig::default()).unwrap();
        client.attach_stream(client_io).await.unwrap();
        assert!(client.is_connected());

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert!(!client.is_connected());
        assert_eq!(client.write_register(DeviceType::D, 0, 1).await, Err(McError::NotConnected));
    }
}
