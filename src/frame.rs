/// MC protocol frame definitions and request frame builder
///
/// Covers the two binary frame variants (3E and 4E), the routing header that
/// precedes every request, the supported commands and the builder that turns
/// a device address into a complete outbound frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::device::{ControllerSeries, DeviceAddress, DeviceType};
use crate::error::{McError, McResult};
use crate::utils::validation::validate_address_range;

/// Width of the subheader field
pub const SUBHEADER_WIDTH: usize = 2;
/// Width of the 4E serial number plus reserved field
pub const SERIAL_WIDTH: usize = 4;
/// Width of network, station, module I/O and module station fields
pub const ROUTE_WIDTH: usize = 5;
/// Width of the data length field
pub const LENGTH_WIDTH: usize = 2;
/// Width of the monitoring timer in requests
pub const TIMER_WIDTH: usize = 2;
/// Width of the end code in responses
pub const END_CODE_WIDTH: usize = 2;

/// Default monitoring timer, in 250ms units
pub const DEFAULT_MONITORING_TIMER: u16 = 0x0010;

/// Binary frame variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FrameVariant {
    /// 3E frame
    Mc3E,
    /// 4E frame (3E plus serial number)
    Mc4E,
}

impl FrameVariant {
    /// Subheader written at the start of a request
    pub const fn request_subheader(self) -> u16 {
        match self {
            FrameVariant::Mc3E => 0x5000,
            FrameVariant::Mc4E => 0x5400,
        }
    }

    /// Subheader expected at the start of a response
    pub const fn response_subheader(self) -> u16 {
        match self {
            FrameVariant::Mc3E => 0xD000,
            FrameVariant::Mc4E => 0xD400,
        }
    }

    /// Length of the fixed header, up to and including the data length field
    pub const fn header_len(self) -> usize {
        let serial = match self {
            FrameVariant::Mc3E => 0,
            FrameVariant::Mc4E => SERIAL_WIDTH,
        };
        SUBHEADER_WIDTH + serial + ROUTE_WIDTH + LENGTH_WIDTH
    }

    /// Offset of the little-endian data length field
    pub const fn length_offset(self) -> usize {
        self.header_len() - LENGTH_WIDTH
    }

    /// Offset of the end code in a response
    pub const fn end_code_offset(self) -> usize {
        self.header_len()
    }

    /// Offset of the first payload byte in a response
    pub const fn payload_offset(self) -> usize {
        self.header_len() + END_CODE_WIDTH
    }

    /// Detect the variant from a request subheader
    pub fn from_request_subheader(subheader: u16) -> Option<Self> {
        match subheader {
            0x5000 => Some(FrameVariant::Mc3E),
            0x5400 => Some(FrameVariant::Mc4E),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameVariant::Mc3E => "3E",
            FrameVariant::Mc4E => "4E",
        }
    }
}

impl Default for FrameVariant {
    fn default() -> Self {
        FrameVariant::Mc3E
    }
}

impl FromStr for FrameVariant {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "3E" | "MC3E" => Ok(FrameVariant::Mc3E),
            "4E" | "MC4E" => Ok(FrameVariant::Mc4E),
            _ => Err(McError::configuration(format!("Unknown frame variant: {}", s))),
        }
    }
}

impl TryFrom<String> for FrameVariant {
    type Error = McError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameVariant> for String {
    fn from(variant: FrameVariant) -> Self {
        variant.name().to_string()
    }
}

impl fmt::Display for FrameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// MC commands used by this library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Batch read in word units (0x0401)
    BatchRead = 0x0401,
    /// Batch write in word units (0x1401)
    BatchWrite = 0x1401,
}

impl Command {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0401 => Some(Command::BatchRead),
            0x1401 => Some(Command::BatchWrite),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn is_write(self) -> bool {
        self == Command::BatchWrite
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::BatchRead => "Batch Read",
            Command::BatchWrite => "Batch Write",
        };
        write!(f, "{} (0x{:04X})", name, self.to_u16())
    }
}

/// Routing header values copied into every request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub network: u8,
    pub station: u8,
    pub module_io: u16,
    pub module_station: u8,
    /// 4E serial number; ignored for 3E
    pub serial: u16,
    pub monitoring_timer: u16,
}

impl Default for FrameHeader {
    fn default() -> Self {
        Self {
            network: 0x00,
            station: 0xFF,
            module_io: 0x03FF,
            module_station: 0x00,
            serial: 0x0000,
            monitoring_timer: DEFAULT_MONITORING_TIMER,
        }
    }
}

/// Builds complete request frames for one variant/series pair
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    variant: FrameVariant,
    series: ControllerSeries,
    header: FrameHeader,
}

impl FrameBuilder {
    pub fn new(variant: FrameVariant, series: ControllerSeries) -> Self {
        Self::with_header(variant, series, FrameHeader::default())
    }

    pub fn with_header(variant: FrameVariant, series: ControllerSeries, header: FrameHeader) -> Self {
        Self { variant, series, header }
    }

    pub fn variant(&self) -> FrameVariant {
        self.variant
    }

    pub fn series(&self) -> ControllerSeries {
        self.series
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Build a batch read request for `address.count` words
    pub fn build_read(&self, address: &DeviceAddress) -> McResult<Bytes> {
        validate_address_range(address, self.series)?;

        let mut body = self.command_prefix(Command::BatchRead);
        address.encode_into(self.series, &mut body)?;
        body.extend_from_slice(&address.count.to_le_bytes());

        Ok(self.assemble(&body))
    }

    /// Build a batch write request storing `values` from `device`/`offset` on
    pub fn build_write(&self, device: DeviceType, offset: u32, values: &[i16]) -> McResult<Bytes> {
        let count = u16::try_from(values.len())
            .map_err(|_| McError::configuration(format!("Too many values: {}", values.len())))?;
        let address = DeviceAddress::with_count(device, offset, count);
        validate_address_range(&address, self.series)?;

        let mut body = self.command_prefix(Command::BatchWrite);
        body.reserve(self.series.address_width() + 2 + values.len() * 2);
        address.encode_into(self.series, &mut body)?;
        body.extend_from_slice(&count.to_le_bytes());
        for value in values {
            body.extend_from_slice(&value.to_le_bytes());
        }

        Ok(self.assemble(&body))
    }

    fn command_prefix(&self, command: Command) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);
        body.extend_from_slice(&command.to_u16().to_le_bytes());
        body.extend_from_slice(&self.series.word_subcommand().to_le_bytes());
        body
    }

    /// Prepend the fixed header and monitoring timer to a command body
    fn assemble(&self, body: &[u8]) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.variant.header_len() + TIMER_WIDTH + body.len());

        // subheader is the only big-endian field
        frame.put_u16(self.variant.request_subheader());
        if self.variant == FrameVariant::Mc4E {
            frame.put_u16_le(self.header.serial);
            frame.put_u16_le(0x0000);
        }
        frame.put_u8(self.header.network);
        frame.put_u8(self.header.station);
        frame.put_u16_le(self.header.module_io);
        frame.put_u8(self.header.module_station);
        frame.put_u16_le((TIMER_WIDTH + body.len()) as u16);
        frame.put_u16_le(self.header.monitoring_timer);
        frame.put_slice(body);

        frame.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared_length(frame: &[u8], variant: FrameVariant) -> usize {
        let at = variant.length_offset();
        u16::from_le_bytes([frame[at], frame[at + 1]]) as usize
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(FrameVariant::Mc3E.header_len(), 9);
        assert_eq!(FrameVariant::Mc4E.header_len(), 13);
        assert_eq!(FrameVariant::Mc3E.payload_offset(), 11);
        assert_eq!(FrameVariant::Mc4E.payload_offset(), 15);
    }

    #[test]
    fn test_read_frame_3e_q() {
        let builder = FrameBuilder::new(FrameVariant::Mc3E, ControllerSeries::Q);
        let frame = builder.build_read(&DeviceAddress::new(DeviceType::D, 100)).unwrap();

        assert_eq!(
            frame.as_ref(),
            &[
                0x50, 0x00, // subheader
                0x00, 0xFF, 0xFF, 0x03, 0x00, // route
                0x0C, 0x00, // length
                0x10, 0x00, // timer
                0x01, 0x04, 0x00, 0x00, // command, subcommand
                0x64, 0x00, 0x00, 0xA8, // D100
                0x01, 0x00, // count
            ]
        );
    }

    #[test]
    fn test_read_frame_4e_iqr() {
        let header = FrameHeader { serial: 0x1234, ..FrameHeader::default() };
        let builder = FrameBuilder::with_header(FrameVariant::Mc4E, ControllerSeries::IqR, header);
        let frame = builder
            .build_read(&DeviceAddress::with_count(DeviceType::W, 0x10, 4))
            .unwrap();

        assert_eq!(&frame[0..6], &[0x54, 0x00, 0x34, 0x12, 0x00, 0x00]);
        assert_eq!(&frame[15..19], &[0x01, 0x04, 0x02, 0x00]);
        assert_eq!(&frame[19..25], &[0x10, 0x00, 0x00, 0x00, 0xB4, 0x00]);
        assert_eq!(&frame[25..27], &[0x04, 0x00]);
    }

    #[test]
    fn test_write_frame_encodes_signed_values() {
        let builder = FrameBuilder::new(FrameVariant::Mc3E, ControllerSeries::Q);
        let frame = builder.build_write(DeviceType::D, 200, &[-1, 0x1234]).unwrap();

        let body = &frame[FrameVariant::Mc3E.header_len() + TIMER_WIDTH..];
        assert_eq!(&body[0..4], &[0x01, 0x14, 0x00, 0x00]);
        assert_eq!(&body[4..8], &[0xC8, 0x00, 0x00, 0xA8]);
        assert_eq!(&body[8..10], &[0x02, 0x00]);
        assert_eq!(&body[10..], &[0xFF, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_declared_length_matches_frame() {
        for variant in [FrameVariant::Mc3E, FrameVariant::Mc4E] {
            for series in [ControllerSeries::Q, ControllerSeries::IqR] {
                let builder = FrameBuilder::new(variant, series);
                for count in [1u16, 2, 17, 960] {
                    let read = builder
                        .build_read(&DeviceAddress::with_count(DeviceType::D, 0, count))
                        .unwrap();
                    assert_eq!(declared_length(&read, variant), read.len() - variant.header_len());

                    let values = vec![7i16; count as usize];
                    let write = builder.build_write(DeviceType::D, 0, &values).unwrap();
                    assert_eq!(declared_length(&write, variant), write.len() - variant.header_len());
                }
            }
        }
    }

    #[test]
    fn test_count_limits() {
        let builder = FrameBuilder::new(FrameVariant::Mc3E, ControllerSeries::Q);
        assert!(builder.build_read(&DeviceAddress::with_count(DeviceType::D, 0, 0)).is_err());
        assert!(builder.build_read(&DeviceAddress::with_count(DeviceType::D, 0, 961)).is_err());
        assert!(builder.build_write(DeviceType::D, 0, &[]).is_err());
        assert!(builder.build_write(DeviceType::D, 0, &vec![0; 961]).is_err());
    }

    #[test]
    fn test_variant_and_command_parsing() {
        assert_eq!("4e".parse::<FrameVariant>().unwrap(), FrameVariant::Mc4E);
        assert!("5E".parse::<FrameVariant>().is_err());
        assert_eq!(FrameVariant::from_request_subheader(0x5400), Some(FrameVariant::Mc4E));
        assert_eq!(Command::from_u16(0x1401), Some(Command::BatchWrite));
        assert_eq!(Command::from_u16(0x0801), None);
    }
}
