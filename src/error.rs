//! # Voltage MC Error Handling
//!
//! This module provides error handling for the Voltage MC library, covering
//! transport failures, frame validation, PLC end codes and address/configuration
//! problems.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **Connection Timeout**: the TCP connection could not be opened in time
//! - **Connection Errors**: socket level failures, including a stream closed by the peer
//! - **Not Connected**: an operation was attempted without an open connection
//! - **Connection Closed**: a pending request was aborted because the connection went away
//! - **Request Timeout**: no response arrived within the request timeout
//!
//! ### Protocol Errors
//! - **Invalid Subheader**: the response does not start with the expected marker
//! - **PLC Errors**: the controller answered with a non-zero end code
//! - **Malformed Response**: the response payload cannot be decoded
//!
//! ### Address Errors
//! - **Unknown Device Type**: the device letter code is not in the device table
//! - **Invalid Address Format**: a textual register reference could not be parsed
//!
//! ## Usage Examples
//!
//! ```rust
//! use voltage_mc::{McError, McResult};
//!
//! fn handle(result: McResult<i16>) {
//!     match result {
//!         Ok(value) => println!("value = {}", value),
//!         Err(McError::PlcError { code, description }) => {
//!             println!("PLC rejected request: 0x{:04X} ({})", code, description);
//!         }
//!         Err(error) if error.is_recoverable() => println!("retry later: {}", error),
//!         Err(error) => println!("fatal: {}", error),
//!     }
//! }
//! ```
//!
//! This layer never retries on its own. Whether a failed read or write is
//! retried is up to the caller, `is_recoverable` is only a hint.

use thiserror::Error;

/// Result type alias for MC protocol operations
pub type McResult<T> = Result<T, McError>;

/// MC protocol error types
///
/// Every variant surfaces to the caller of the operation that triggered it.
/// `Clone` is required because a single connection loss is reported to every
/// pending request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McError {
    /// Low-level I/O failure not tied to a specific connection state
    #[error("I/O error: {message}")]
    Io { message: String },

    /// The TCP connection could not be established within the connect timeout
    #[error("Connection to {address} timed out after {timeout_ms}ms")]
    ConnectionTimeout { address: String, timeout_ms: u64 },

    /// Transport-level failure (refused, reset, broken pipe, peer closed)
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// An operation was attempted while no connection is open
    #[error("Not connected")]
    NotConnected,

    /// The device letter code is not part of the device table
    #[error("Unknown device type: {code}")]
    UnknownDeviceType { code: String },

    /// A textual register reference such as `D100` could not be parsed
    #[error("Invalid address format: {input}")]
    InvalidAddressFormat { input: String },

    /// The response did not start with the marker expected for the frame variant
    #[error("Invalid subheader: expected 0x{expected:04X}, got 0x{actual:04X}")]
    InvalidSubheader { expected: u16, actual: u16 },

    /// The PLC answered with a non-zero end code
    ///
    /// The numeric code is always preserved so callers can act on it.
    #[error("PLC error 0x{code:04X}: {description}")]
    PlcError { code: u16, description: String },

    /// The response frame could not be decoded
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// No response arrived before the request timeout fired
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout { request_id: u64, timeout_ms: u64 },

    /// A pending request was aborted because the connection closed
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// Invalid client configuration or request parameters
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl McError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a connection timeout error
    pub fn connection_timeout<S: Into<String>>(address: S, timeout_ms: u64) -> Self {
        Self::ConnectionTimeout {
            address: address.into(),
            timeout_ms,
        }
    }

    /// Create a transport-level connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::ConnectionError { message: message.into() }
    }

    /// Create an unknown device type error
    pub fn unknown_device<S: Into<String>>(code: S) -> Self {
        Self::UnknownDeviceType { code: code.into() }
    }

    /// Create an invalid address format error
    pub fn invalid_address<S: Into<String>>(input: S) -> Self {
        Self::InvalidAddressFormat { input: input.into() }
    }

    /// Create an invalid subheader error
    pub fn invalid_subheader(expected: u16, actual: u16) -> Self {
        Self::InvalidSubheader { expected, actual }
    }

    /// Create a PLC error from an end code
    ///
    /// Known end codes are mapped to a short description, unknown ones keep
    /// a generic message. The code itself is never altered.
    pub fn plc(code: u16) -> Self {
        let description = match code {
            0x4031 => "Device range outside the allowed area",
            0x4080 => "Request data error",
            0xC050 => "ASCII data could not be converted to binary",
            0xC051..=0xC054 => "Number of read/write points out of range",
            0xC055 => "File data read/write points out of range",
            0xC056 => "Read/write request exceeds the maximum address",
            0xC057 => "Request data length does not match the number of points",
            0xC058 => "Request data length after ASCII conversion does not match",
            0xC059 => "Command or subcommand not supported",
            0xC05B => "CPU module cannot read/write the specified device",
            0xC05C => "Request content error",
            0xC05F => "Request cannot be executed for the target CPU module",
            0xC060 => "Request content error for bit device",
            0xC061 => "Request data length does not match",
            0xC06F => "Communication data code mismatch",
            0xC0D8 => "Number of specified blocks exceeds the range",
            0xCEE0 | 0xCEE1 | 0xCEE2 => "Network routing error",
            _ => "Unknown end code",
        }
        .to_string();

        Self::PlcError { code, description }
    }

    /// Create a malformed response error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Create a request timeout error
    pub fn request_timeout(request_id: u64, timeout_ms: u64) -> Self {
        Self::RequestTimeout { request_id, timeout_ms }
    }

    /// Create a connection closed error
    pub fn connection_closed<S: Into<String>>(reason: S) -> Self {
        Self::ConnectionClosed { reason: reason.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// End code carried by a `PlcError`, if any
    pub fn plc_code(&self) -> Option<u16> {
        match self {
            Self::PlcError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if the error might go away when the operation is retried
    ///
    /// ```rust
    /// use voltage_mc::McError;
    ///
    /// assert!(McError::request_timeout(1, 5000).is_recoverable());
    /// assert!(!McError::unknown_device("Q").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionError { .. }
                | Self::NotConnected
                | Self::RequestTimeout { .. }
                | Self::ConnectionClosed { .. }
        )
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionError { .. }
                | Self::NotConnected
                | Self::RequestTimeout { .. }
                | Self::ConnectionClosed { .. }
        )
    }

    /// Check if the error was produced while validating a response
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSubheader { .. } | Self::PlcError { .. } | Self::MalformedResponse { .. }
        )
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for McError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for McError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

/// Convert from serde YAML errors
impl From<serde_yaml::Error> for McError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::configuration(format!("YAML error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = McError::request_timeout(3, 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());
        assert!(!err.is_protocol_error());

        let err = McError::plc(0xC059);
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());
        assert_eq!(err.plc_code(), Some(0xC059));
    }

    #[test]
    fn test_plc_error_keeps_code() {
        let err = McError::plc(0x4031);
        let msg = format!("{}", err);
        assert!(msg.contains("4031"));
        assert_eq!(err.plc_code(), Some(0x4031));

        let unknown = McError::plc(0x1234);
        assert_eq!(unknown.plc_code(), Some(0x1234));
        assert!(format!("{}", unknown).contains("Unknown end code"));
    }

    #[test]
    fn test_error_display() {
        let err = McError::invalid_subheader(0xD000, 0x5000);
        let msg = format!("{}", err);
        assert!(msg.contains("D000"));
        assert!(msg.contains("5000"));
    }
}
