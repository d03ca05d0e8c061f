/// Client configuration
///
/// `McConfig` describes one PLC connection. Every field has a default, so a
/// configuration file only needs to name what differs:
///
/// ```yaml
/// host: 192.168.3.39
/// port: 5000
/// series: iQ-R
/// frame_variant: 4E
/// request_timeout_ms: 2000
/// ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::ControllerSeries;
use crate::error::{McError, McResult};
use crate::frame::{FrameHeader, FrameVariant, DEFAULT_MONITORING_TIMER};
use crate::{DEFAULT_MC_PORT, DEFAULT_TIMEOUT_MS};

/// Connection settings for one PLC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Falls back to `connect_timeout_ms` when unset
    pub request_timeout_ms: Option<u64>,
    pub series: ControllerSeries,
    pub frame_variant: FrameVariant,
    pub network: u8,
    pub station: u8,
    pub module_io: u16,
    pub module_station: u8,
    /// Monitoring timer in 250ms units
    pub monitoring_timer: u16,
    /// 4E serial number, fixed for the connection
    pub serial_number: u16,
    /// Log every frame as hex
    pub packet_logging: bool,
}

impl Default for McConfig {
    fn default() -> Self {
        let header = FrameHeader::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_MC_PORT,
            connect_timeout_ms: DEFAULT_TIMEOUT_MS,
            request_timeout_ms: None,
            series: ControllerSeries::default(),
            frame_variant: FrameVariant::default(),
            network: header.network,
            station: header.station,
            module_io: header.module_io,
            module_station: header.module_station,
            monitoring_timer: DEFAULT_MONITORING_TIMER,
            serial_number: header.serial,
            packet_logging: false,
        }
    }
}

impl McConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_series(mut self, series: ControllerSeries) -> Self {
        self.series = series;
        self
    }

    pub fn with_frame_variant(mut self, variant: FrameVariant) -> Self {
        self.frame_variant = variant;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(self.connect_timeout_ms))
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Routing header for request frames
    pub fn frame_header(&self) -> FrameHeader {
        FrameHeader {
            network: self.network,
            station: self.station,
            module_io: self.module_io,
            module_station: self.module_station,
            serial: self.serial_number,
            monitoring_timer: self.monitoring_timer,
        }
    }

    /// Check the configuration before connecting
    pub fn validate(&self) -> McResult<()> {
        if self.host.trim().is_empty() {
            return Err(McError::configuration("Host cannot be empty"));
        }
        if self.port == 0 {
            return Err(McError::configuration("Port cannot be zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(McError::configuration("Connect timeout must be greater than zero"));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(McError::configuration("Request timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn from_yaml_str(text: &str) -> McResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> McResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`, `.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> McResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(McError::configuration(format!(
                "Unsupported config file type: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = McConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(config.request_timeout(), config.connect_timeout());
        assert_eq!(config.frame_header(), FrameHeader::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial() {
        let config = McConfig::from_yaml_str(
            "host: 10.0.0.5\nport: 5001\nseries: iq-r\nframe_variant: 4e\nrequest_timeout_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.address(), "10.0.0.5:5001");
        assert_eq!(config.series, ControllerSeries::IqR);
        assert_eq!(config.frame_variant, FrameVariant::Mc4E);
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.station, 0xFF);
    }

    #[test]
    fn test_json_round_trip() {
        let config = McConfig::new("plc", 5000).with_series(ControllerSeries::QnA);
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"QnA\""));
        assert_eq!(McConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values() {
        assert!(McConfig::new("", 5000).validate().is_err());
        assert!(McConfig::new("plc", 0).validate().is_err());
        assert!(matches!(
            McConfig::from_yaml_str("series: FX5\n"),
            Err(McError::Configuration { .. })
        ));
    }
}
