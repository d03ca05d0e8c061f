//! # Voltage MC - Async MELSEC MC Protocol Client
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! An async implementation of the MELSEC communication (MC) protocol in its
//! binary 3E and 4E frame formats, for reading and writing device memory on
//! Mitsubishi programmable controllers over TCP.
//!
//! ## Features
//!
//! - **Both frame variants**: 3E and 4E binary frames with configurable routing
//! - **All controller series**: Q, L, QnA, iQ-L and iQ-R device layouts
//! - **Stream reassembly**: responses split or merged by TCP are handled transparently
//! - **Ordered correlation**: one request in flight per connection, per-request timeouts
//! - **Precise errors**: PLC end codes are surfaced with their numeric value
//! - **Built-in simulator**: an MC TCP server backed by in-memory device storage
//!
//! ## Supported Commands
//!
//! | Command | Subcommand | Function | Client | Simulator |
//! |---------|------------|----------|--------|-----------|
//! | 0x0401 | 0x0000 / 0x0002 | Batch read, word units | ✅ | ✅ |
//! | 0x1401 | 0x0000 / 0x0002 | Batch write, word units | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ### Client Example
//!
//! ```rust,no_run
//! use voltage_mc::{ControllerSeries, DeviceType, McConfig, McResult, McTcpClient, PlcClient};
//!
//! #[tokio::main]
//! async fn main() -> McResult<()> {
//!     let config = McConfig::new("192.168.3.39", 5000).with_series(ControllerSeries::Q);
//!     let client = McTcpClient::connect_to(config).await?;
//!
//!     let value = client.read_register(DeviceType::D, 100).await?;
//!     println!("D100 = {}", value);
//!
//!     client.write_register(DeviceType::D, 200, -1).await?;
//!
//!     let values = client.read_registers(&["D0", "X1F", "W10"]).await?;
//!     println!("{:?}", values);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Simulator Example
//!
//! ```rust,no_run
//! use voltage_mc::{DeviceMemory, McServer, McTcpServer, McTcpServerConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = McTcpServerConfig {
//!         bind_address: "127.0.0.1:5000".parse()?,
//!         max_connections: 8,
//!         request_timeout: Duration::from_secs(30),
//!         device_memory: Some(Arc::new(DeviceMemory::new())),
//!     };
//!
//!     let mut server = McTcpServer::with_config(config)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Application   │    │   Application   │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │    PlcClient    │    │   MC Simulator  │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Frame / Device  │    │  Device Memory  │
//! │  Response codec │    │    (Storage)    │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Transport +     │◄──►│  Frame buffer   │
//! │ Correlator      │    │   (Async I/O)   │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Device table, controller series and device address encoding
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod device;

/// Frame variants and request frame construction
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod frame;

/// Reassembly of frames from a byte stream
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod codec;

/// Response validation and decoding
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod response;

/// FIFO request/response correlation
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod correlator;

/// Network transport layer
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// MC client implementations
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod client;

/// Client configuration
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod config;

/// MC PLC simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod server;

/// Thread-safe device storage for the simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod device_memory;

/// Utility functions and performance monitoring
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod utils;

/// Logging system for the library
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use error::{McError, McResult};
pub use device::{ControllerSeries, DeviceAddress, DeviceType};
pub use frame::{Command, FrameBuilder, FrameHeader, FrameVariant};
pub use codec::FrameBuffer;
pub use response::{decode_response, McResponse};
pub use correlator::Correlator;
pub use transport::{McTransport, StreamTransport, TransportOptions, TransportStats};
pub use client::{McTcpClient, PlcClient, WriteEntry};
pub use config::McConfig;
pub use server::{McServer, McTcpServer, McTcpServerConfig, ServerStats};
pub use device_memory::{DeviceMemory, DeviceMemoryStats};
pub use utils::{PerformanceMetrics, OperationTimer};
pub use logging::{LogLevel, LogCallback, CallbackLogger, LoggingMode};

/// Default timeout for connecting and for requests (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Maximum number of words that can be read/written in a single request
pub const MAX_WORDS_PER_REQUEST: usize = 960;

/// Default MC protocol TCP port
pub const DEFAULT_MC_PORT: u16 = 5000;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage MC v{} - Async MELSEC MC protocol (3E/4E binary) client by Evan Liu", VERSION)
}
