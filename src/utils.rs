/// Utility functions and helpers for MC operations
///
/// This module contains performance monitoring, request validation and
/// metrics formatting helpers.

use std::time::{Duration, Instant};
use log::debug;
use crate::device::{ControllerSeries, DeviceAddress};
use crate::error::{McError, McResult};

/// Performance metrics for MC operations
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub avg_duration: Duration,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful operation
    pub fn record_success(&mut self, duration: Duration) {
        self.successful_requests += 1;
        self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
        self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
        self.record(duration);
    }

    /// Record a failed operation
    pub fn record_failure(&mut self, duration: Duration) {
        self.failed_requests += 1;
        self.record(duration);
    }

    fn record(&mut self, duration: Duration) {
        self.total_requests += 1;
        self.total_duration += duration;
        self.avg_duration = self.total_duration / self.total_requests as u32;
    }

    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }
}

/// Timer for measuring operation duration
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    /// Start a new timer
    pub fn start(operation_name: &str) -> Self {
        debug!("Starting operation: {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name: operation_name.to_string(),
        }
    }

    /// Stop the timer and return duration
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        debug!("Operation '{}' completed in {:?}", self.operation_name, duration);
        duration
    }
}

/// Request validation utilities
pub mod validation {
    use super::*;

    /// Validate a per-request word count (1-960)
    pub fn validate_word_count(count: u16) -> McResult<()> {
        if count == 0 || count as usize > crate::MAX_WORDS_PER_REQUEST {
            return Err(McError::configuration(format!(
                "Invalid word count: {} (must be 1-{})",
                count,
                crate::MAX_WORDS_PER_REQUEST
            )));
        }
        Ok(())
    }

    /// Validate that every word of `address` is addressable on `series`
    pub fn validate_address_range(address: &DeviceAddress, series: ControllerSeries) -> McResult<()> {
        validate_word_count(address.count)?;
        let last = address.offset as u64 + address.count as u64 - 1;
        if last > series.max_device_number() as u64 {
            return Err(McError::configuration(format!(
                "{} exceeds the {} series device range",
                address, series
            )));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Format performance metrics as a table
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        format!(
            "Performance Metrics:\n\
             ├─ Total Requests: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {}\n\
             ├─ Average Duration: {}\n\
             ├─ Min Duration: {}\n\
             └─ Max Duration: {}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            format_duration(metrics.avg_duration),
            metrics.min_duration.map_or("N/A".to_string(), format_duration),
            metrics.max_duration.map_or("N/A".to_string(), format_duration),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;

    #[test]
    fn test_performance_metrics() {
        let mut metrics = PerformanceMetrics::new();

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_failure(Duration::from_millis(150));

        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.avg_duration, Duration::from_millis(150));
        assert_eq!(metrics.min_duration, Some(Duration::from_millis(100)));
        assert!((metrics.success_rate() - 66.67).abs() < 0.1);
    }

    #[test]
    fn test_validation() {
        assert!(validation::validate_word_count(1).is_ok());
        assert!(validation::validate_word_count(960).is_ok());
        assert!(validation::validate_word_count(0).is_err());
        assert!(validation::validate_word_count(961).is_err());

        let near_end = DeviceAddress::with_count(DeviceType::ZR, 0x00FF_FFF0, 16);
        assert!(validation::validate_address_range(&near_end, ControllerSeries::Q).is_ok());
        let past_end = DeviceAddress::with_count(DeviceType::ZR, 0x00FF_FFF0, 17);
        assert!(validation::validate_address_range(&past_end, ControllerSeries::Q).is_err());
        assert!(validation::validate_address_range(&past_end, ControllerSeries::IqR).is_ok());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format::format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format::format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format::format_duration(Duration::from_secs(90)), "1m 30.0s");

        let mut metrics = PerformanceMetrics::new();
        assert!(format::format_metrics(&metrics).contains("Min Duration: N/A"));
        metrics.record_success(Duration::from_millis(20));
        let table = format::format_metrics(&metrics);
        assert!(table.contains("Total Requests: 1"));
        assert!(table.contains("Successful: 1 (100.0%)"));
    }
}
