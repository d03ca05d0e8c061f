use std::sync::Arc;

use crate::device::DeviceAddress;
use crate::error::McResult;
use crate::frame::Command;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

/// Logging mode for frame display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw frame bytes only
    Raw,
    /// Show command, device and values
    Interpreted,
    /// Show both raw and interpreted data
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Maximum number of values shown in an interpreted response line
const MAX_LOGGED_VALUES: usize = 8;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => eprintln!("[{}] {}: {}", timestamp, level.as_str(), message),
                LogLevel::Info | LogLevel::Debug => println!("[{}] {}: {}", timestamp, level.as_str(), message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log frame bytes as a hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!("{} frame ({} bytes): {}", direction, data.len(), hex::encode_upper(data));
        self.log(level, &message);
    }

    /// Log an outgoing request frame
    pub fn log_request(&self, command: Command, address: &DeviceAddress, frame: &[u8]) {
        let interpreted = format!(
            "MC Request -> {}, Device: {}, Points: {}",
            command,
            address.key(),
            address.count
        );
        let raw = format!("MC Request -> Raw: {}", hex::encode_upper(frame));
        self.emit(&interpreted, &raw);
    }

    /// Log the outcome of a request
    ///
    /// Failures are always logged as warnings, whatever the mode.
    pub fn log_response(&self, command: Command, address: &DeviceAddress, result: &McResult<Vec<i16>>) {
        let values = match result {
            Ok(values) => values,
            Err(err) => {
                self.warn(&format!("MC Response <- {}, Device: {}, Error: {}", command, address.key(), err));
                return;
            }
        };

        let interpreted = if command.is_write() {
            format!("MC Response <- {}, Device: {}, OK", command, address.key())
        } else {
            let shown = &values[..values.len().min(MAX_LOGGED_VALUES)];
            format!(
                "MC Response <- {}, Device: {}, Values: {:?}{}",
                command,
                address.key(),
                shown,
                if values.len() > shown.len() { " ..." } else { "" }
            )
        };
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let raw = format!("MC Response <- Payload: {}", hex::encode_upper(payload));
        self.emit(&interpreted, &raw);
    }

    fn emit(&self, interpreted: &str, raw: &str) {
        match self.mode {
            LoggingMode::Raw => self.info(raw),
            LoggingMode::Interpreted => self.info(interpreted),
            LoggingMode::Both => {
                self.info(interpreted);
                self.debug(raw);
            }
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use crate::error::McError;
    use std::sync::Mutex;

    fn capture(level: LogLevel, mode: LoggingMode) -> (CallbackLogger, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: LogCallback = Box::new(move |level, message| {
            sink.lock().unwrap().push((level, message.to_string()));
        });
        (CallbackLogger::with_mode(Some(callback), level, mode), lines)
    }

    #[test]
    fn test_interpreted_request_and_response() {
        let (logger, lines) = capture(LogLevel::Info, LoggingMode::Interpreted);
        let address = DeviceAddress::with_count(DeviceType::D, 100, 2);

        logger.log_request(Command::BatchRead, &address, &[0x50, 0x00]);
        logger.log_response(Command::BatchRead, &address, &Ok(vec![1, -2]));

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].1.contains("Batch Read"));
        assert!(lines[0].1.contains("D100"));
        assert!(lines[1].1.contains("[1, -2]"));
    }

    #[test]
    fn test_raw_mode_and_level_filter() {
        let (logger, lines) = capture(LogLevel::Info, LoggingMode::Both);
        let address = DeviceAddress::new(DeviceType::W, 0x1F);

        logger.log_request(Command::BatchWrite, &address, &[0x50, 0x00, 0x00, 0xFF]);

        // raw line goes to debug, which is filtered out at Info
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].1.contains("W1F"));
    }

    #[test]
    fn test_raw_request_hex() {
        let (logger, lines) = capture(LogLevel::Debug, LoggingMode::Raw);
        let address = DeviceAddress::new(DeviceType::D, 0);

        logger.log_request(Command::BatchRead, &address, &[0x50, 0x00, 0x00, 0xFF]);
        logger.log_packet(LogLevel::Debug, "send", &[0xD0, 0x0a]);

        let lines = lines.lock().unwrap();
        assert_eq!(lines[0].1, "MC Request -> Raw: 500000FF");
        assert_eq!(lines[1].1, "send frame (2 bytes): D00A");
    }

    #[test]
    fn test_error_response_is_warning() {
        let (logger, lines) = capture(LogLevel::Warn, LoggingMode::Raw);
        let address = DeviceAddress::new(DeviceType::D, 0);

        logger.log_response(Command::BatchRead, &address, &Err(McError::plc(0xC059)));

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Warn);
        assert!(lines[0].1.contains("C059"));
    }

    #[test]
    fn test_disabled_logger() {
        let logger = CallbackLogger::disabled();
        logger.error("nothing happens");
        assert_eq!(logger.get_mode(), LoggingMode::Interpreted);
    }
}
