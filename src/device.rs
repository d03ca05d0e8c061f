/// MC protocol device definitions and address encoding
///
/// This module contains the device table (letter code to binary device code),
/// the controller series selector that decides the on-wire address layout,
/// and `DeviceAddress`, the structured form of a register reference such as
/// `D100` or `X1F`.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{McError, McResult};

/// Numeric base a device uses for its native addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberBase {
    Decimal,
    Hexadecimal,
}

impl NumberBase {
    /// Radix usable with `from_str_radix`
    pub fn radix(self) -> u32 {
        match self {
            NumberBase::Decimal => 10,
            NumberBase::Hexadecimal => 16,
        }
    }

    /// Render an offset in this base
    pub fn format(self, offset: u32) -> String {
        match self {
            NumberBase::Decimal => offset.to_string(),
            NumberBase::Hexadecimal => format!("{:X}", offset),
        }
    }
}

/// Whether a device holds bits or words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Bit,
    Word,
}

/// Recognized device types
///
/// Variant order matches `DEVICE_TABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceType {
    /// Special relay
    SM,
    /// Special register
    SD,
    /// Input
    X,
    /// Output
    Y,
    /// Internal relay
    M,
    /// Latch relay
    L,
    /// Annunciator
    F,
    /// Edge relay
    V,
    /// Link relay
    B,
    /// Data register
    D,
    /// Link register
    W,
    /// Timer contact
    TS,
    /// Timer coil
    TC,
    /// Timer current value
    TN,
    /// Retentive timer contact
    SS,
    /// Retentive timer coil
    SC,
    /// Retentive timer current value
    SN,
    /// Counter contact
    CS,
    /// Counter coil
    CC,
    /// Counter current value
    CN,
    /// Link special relay
    SB,
    /// Link special register
    SW,
    /// Step relay
    S,
    /// Direct access input
    DX,
    /// Direct access output
    DY,
    /// Index register
    Z,
    /// File register (block switching)
    R,
    /// File register (serial number access)
    ZR,
}

/// Static description of one device type
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub device: DeviceType,
    pub symbol: &'static str,
    pub code: u16,
    pub base: NumberBase,
    pub kind: DeviceKind,
}

const fn entry(
    device: DeviceType,
    symbol: &'static str,
    code: u16,
    base: NumberBase,
    kind: DeviceKind,
) -> DeviceInfo {
    DeviceInfo { device, symbol, code, base, kind }
}

use DeviceKind::{Bit, Word};
use NumberBase::{Decimal as Dec, Hexadecimal as Hex};

/// Device code table, indexed by `DeviceType as usize`
pub static DEVICE_TABLE: [DeviceInfo; 28] = [
    entry(DeviceType::SM, "SM", 0x91, Dec, Bit),
    entry(DeviceType::SD, "SD", 0xA9, Dec, Word),
    entry(DeviceType::X, "X", 0x9C, Hex, Bit),
    entry(DeviceType::Y, "Y", 0x9D, Hex, Bit),
    entry(DeviceType::M, "M", 0x90, Dec, Bit),
    entry(DeviceType::L, "L", 0x92, Dec, Bit),
    entry(DeviceType::F, "F", 0x93, Dec, Bit),
    entry(DeviceType::V, "V", 0x94, Dec, Bit),
    entry(DeviceType::B, "B", 0xA0, Hex, Bit),
    entry(DeviceType::D, "D", 0xA8, Dec, Word),
    entry(DeviceType::W, "W", 0xB4, Hex, Word),
    entry(DeviceType::TS, "TS", 0xC1, Dec, Bit),
    entry(DeviceType::TC, "TC", 0xC0, Dec, Bit),
    entry(DeviceType::TN, "TN", 0xC2, Dec, Word),
    entry(DeviceType::SS, "SS", 0xC7, Dec, Bit),
    entry(DeviceType::SC, "SC", 0xC6, Dec, Bit),
    entry(DeviceType::SN, "SN", 0xC8, Dec, Word),
    entry(DeviceType::CS, "CS", 0xC4, Dec, Bit),
    entry(DeviceType::CC, "CC", 0xC3, Dec, Bit),
    entry(DeviceType::CN, "CN", 0xC5, Dec, Word),
    entry(DeviceType::SB, "SB", 0xA1, Hex, Bit),
    entry(DeviceType::SW, "SW", 0xB5, Hex, Word),
    entry(DeviceType::S, "S", 0x98, Dec, Bit),
    entry(DeviceType::DX, "DX", 0xA2, Hex, Bit),
    entry(DeviceType::DY, "DY", 0xA3, Hex, Bit),
    entry(DeviceType::Z, "Z", 0xCC, Dec, Word),
    entry(DeviceType::R, "R", 0xAF, Dec, Word),
    entry(DeviceType::ZR, "ZR", 0xB0, Hex, Word),
];

/// Longest device symbol in the table
const MAX_SYMBOL_LEN: usize = 2;

impl DeviceType {
    /// Table entry for this device
    pub fn info(self) -> &'static DeviceInfo {
        &DEVICE_TABLE[self as usize]
    }

    /// Letter code, e.g. `"D"`
    pub fn symbol(self) -> &'static str {
        self.info().symbol
    }

    /// Binary device code
    pub fn code(self) -> u16 {
        self.info().code
    }

    /// Native addressing base
    pub fn base(self) -> NumberBase {
        self.info().base
    }

    /// Check if offsets of this device are written in hexadecimal
    pub fn is_hex(self) -> bool {
        self.base() == NumberBase::Hexadecimal
    }

    /// Check if this is a bit device
    pub fn is_bit_device(self) -> bool {
        self.info().kind == DeviceKind::Bit
    }

    /// Look up a device by its letter code (case-insensitive)
    pub fn from_symbol(symbol: &str) -> McResult<Self> {
        DEVICE_TABLE
            .iter()
            .find(|info| info.symbol.eq_ignore_ascii_case(symbol))
            .map(|info| info.device)
            .ok_or_else(|| McError::unknown_device(symbol))
    }

    /// Look up a device by its binary device code
    pub fn from_code(code: u16) -> McResult<Self> {
        DEVICE_TABLE
            .iter()
            .find(|info| info.code == code)
            .map(|info| info.device)
            .ok_or_else(|| McError::unknown_device(format!("0x{:04X}", code)))
    }

    /// Parse an offset string in this device's native base
    pub fn parse_offset(self, text: &str) -> McResult<u32> {
        if text.is_empty() || !text.chars().all(|c| c.is_digit(self.base().radix())) {
            return Err(McError::invalid_address(format!("{}{}", self.symbol(), text)));
        }
        u32::from_str_radix(text, self.base().radix())
            .map_err(|_| McError::invalid_address(format!("{}{}", self.symbol(), text)))
    }
}

impl FromStr for DeviceType {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_symbol(s.trim())
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Controller series
///
/// Decides the subcommand used in batch read/write frames and the byte width
/// of every device reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ControllerSeries {
    Q,
    L,
    QnA,
    IqL,
    IqR,
}

impl ControllerSeries {
    /// Canonical series name
    pub fn name(self) -> &'static str {
        match self {
            ControllerSeries::Q => "Q",
            ControllerSeries::L => "L",
            ControllerSeries::QnA => "QnA",
            ControllerSeries::IqL => "iQ-L",
            ControllerSeries::IqR => "iQ-R",
        }
    }

    /// Check if the series uses the extended 4+2 byte device layout
    pub fn is_extended(self) -> bool {
        self == ControllerSeries::IqR
    }

    /// Byte width of the device number field
    pub fn device_number_width(self) -> usize {
        if self.is_extended() { 4 } else { 3 }
    }

    /// Byte width of the device code field
    pub fn device_code_width(self) -> usize {
        if self.is_extended() { 2 } else { 1 }
    }

    /// Total byte width of one encoded device reference
    pub fn address_width(self) -> usize {
        self.device_number_width() + self.device_code_width()
    }

    /// Largest device number the layout can carry
    pub fn max_device_number(self) -> u32 {
        if self.is_extended() { u32::MAX } else { 0x00FF_FFFF }
    }

    /// Subcommand for word-unit batch read/write
    pub fn word_subcommand(self) -> u16 {
        if self.is_extended() { 0x0002 } else { 0x0000 }
    }
}

impl Default for ControllerSeries {
    fn default() -> Self {
        ControllerSeries::Q
    }
}

impl FromStr for ControllerSeries {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "Q" => Ok(ControllerSeries::Q),
            "L" => Ok(ControllerSeries::L),
            "QNA" => Ok(ControllerSeries::QnA),
            "IQL" => Ok(ControllerSeries::IqL),
            "IQR" => Ok(ControllerSeries::IqR),
            _ => Err(McError::configuration(format!("Unknown controller series: {}", s))),
        }
    }
}

impl TryFrom<String> for ControllerSeries {
    type Error = McError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ControllerSeries> for String {
    fn from(series: ControllerSeries) -> Self {
        series.name().to_string()
    }
}

impl fmt::Display for ControllerSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A register reference: device, starting offset and number of words
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub device: DeviceType,
    pub offset: u32,
    pub count: u16,
}

impl DeviceAddress {
    /// Single-word address
    pub fn new(device: DeviceType, offset: u32) -> Self {
        Self { device, offset, count: 1 }
    }

    /// Address covering `count` consecutive words
    pub fn with_count(device: DeviceType, offset: u32, count: u16) -> Self {
        Self { device, offset, count }
    }

    /// Parse a textual register name such as `D100`, `x1f` or `DX10`
    ///
    /// The device prefix is matched against the table longest first, the
    /// remainder must be a number in that device's native base.
    pub fn parse(input: &str) -> McResult<Self> {
        let text = input.trim();
        let letters = text.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if letters == 0 || !text.is_ascii() {
            return Err(McError::invalid_address(input));
        }

        let mut known_prefix = false;
        for len in (1..=letters.min(MAX_SYMBOL_LEN)).rev() {
            let Ok(device) = DeviceType::from_symbol(&text[..len]) else {
                continue;
            };
            known_prefix = true;
            if let Ok(offset) = device.parse_offset(&text[len..]) {
                return Ok(Self::new(device, offset));
            }
        }

        if known_prefix {
            Err(McError::invalid_address(input))
        } else {
            Err(McError::unknown_device(&text[..letters]))
        }
    }

    /// Display key, e.g. `D100` or `X1F`
    pub fn key(&self) -> String {
        self.key_at(0)
    }

    /// Display key of the word `index` positions after the start
    pub fn key_at(&self, index: u16) -> String {
        let offset = self.offset.saturating_add(index as u32);
        format!("{}{}", self.device.symbol(), self.device.base().format(offset))
    }

    /// Append the on-wire device reference for `series`
    pub fn encode_into(&self, series: ControllerSeries, out: &mut Vec<u8>) -> McResult<()> {
        if self.offset > series.max_device_number() {
            return Err(McError::configuration(format!(
                "Device number {} out of range for {} series",
                self.key(),
                series
            )));
        }

        let number = self.offset.to_le_bytes();
        out.extend_from_slice(&number[..series.device_number_width()]);
        let code = self.device.code().to_le_bytes();
        out.extend_from_slice(&code[..series.device_code_width()]);
        Ok(())
    }

    /// On-wire device reference for `series`
    pub fn encode(&self, series: ControllerSeries) -> McResult<Vec<u8>> {
        let mut out = Vec::with_capacity(series.address_width());
        self.encode_into(series, &mut out)?;
        Ok(out)
    }

    /// Decode a device reference laid out for `series`
    ///
    /// Returns the device and its offset; the count is not part of the
    /// reference and is left at 1.
    pub fn decode(bytes: &[u8], series: ControllerSeries) -> McResult<Self> {
        if bytes.len() < series.address_width() {
            return Err(McError::malformed(format!(
                "Device reference needs {} bytes, got {}",
                series.address_width(),
                bytes.len()
            )));
        }

        let (offset, code) = if series.is_extended() {
            (LittleEndian::read_u32(&bytes[0..4]), LittleEndian::read_u16(&bytes[4..6]))
        } else {
            (LittleEndian::read_u24(&bytes[0..3]), bytes[3] as u16)
        };

        Ok(Self::new(DeviceType::from_code(code)?, offset))
    }
}

impl FromStr for DeviceAddress {
    type Err = McError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count > 1 {
            write!(f, "{} (x{})", self.key(), self.count)
        } else {
            f.write_str(&self.key())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_SERIES: [ControllerSeries; 5] = [
        ControllerSeries::Q,
        ControllerSeries::L,
        ControllerSeries::QnA,
        ControllerSeries::IqL,
        ControllerSeries::IqR,
    ];

    #[test]
    fn test_table_order_matches_enum() {
        for (index, info) in DEVICE_TABLE.iter().enumerate() {
            assert_eq!(info.device as usize, index, "table entry {} out of order", info.symbol);
        }
    }

    #[test]
    fn test_device_lookup() {
        assert_eq!(DeviceType::from_symbol("D").unwrap(), DeviceType::D);
        assert_eq!(DeviceType::from_symbol("zr").unwrap(), DeviceType::ZR);
        assert_eq!(DeviceType::D.code(), 0xA8);
        assert_eq!(DeviceType::from_code(0x9C).unwrap(), DeviceType::X);
        assert!(matches!(
            DeviceType::from_symbol("Q"),
            Err(McError::UnknownDeviceType { .. })
        ));
    }

    #[test]
    fn test_encode_layouts() {
        let addr = DeviceAddress::new(DeviceType::D, 100);
        assert_eq!(addr.encode(ControllerSeries::Q).unwrap(), vec![0x64, 0x00, 0x00, 0xA8]);
        assert_eq!(
            addr.encode(ControllerSeries::IqR).unwrap(),
            vec![0x64, 0x00, 0x00, 0x00, 0xA8, 0x00]
        );

        let too_big = DeviceAddress::new(DeviceType::ZR, 0x0100_0000);
        assert!(too_big.encode(ControllerSeries::Q).is_err());
        assert!(too_big.encode(ControllerSeries::IqR).is_ok());
    }

    #[test]
    fn test_round_trip_all_devices_and_series() {
        for series in ALL_SERIES {
            for info in DEVICE_TABLE.iter() {
                for offset in [0u32, 1, 255, 0x1234, 0x00FF_FFFF] {
                    let addr = DeviceAddress::new(info.device, offset);
                    let bytes = addr.encode(series).unwrap();
                    assert_eq!(bytes.len(), series.address_width());
                    let decoded = DeviceAddress::decode(&bytes, series).unwrap();
                    assert_eq!(decoded, addr, "{} on {}", addr, series);
                }
            }
        }
    }

    #[test]
    fn test_parse_register_names() {
        assert_eq!(DeviceAddress::parse("D0").unwrap(), DeviceAddress::new(DeviceType::D, 0));
        assert_eq!(DeviceAddress::parse("d100").unwrap(), DeviceAddress::new(DeviceType::D, 100));
        // hex devices read their offset in base 16
        assert_eq!(DeviceAddress::parse("X10").unwrap(), DeviceAddress::new(DeviceType::X, 16));
        assert_eq!(DeviceAddress::parse("X1F").unwrap(), DeviceAddress::new(DeviceType::X, 0x1F));
        assert_eq!(DeviceAddress::parse("DX10").unwrap(), DeviceAddress::new(DeviceType::DX, 16));
        assert_eq!(DeviceAddress::parse("ZR20").unwrap(), DeviceAddress::new(DeviceType::ZR, 0x20));
        assert_eq!(DeviceAddress::parse("SM400").unwrap(), DeviceAddress::new(DeviceType::SM, 400));
    }

    #[test]
    fn test_parse_register_name_errors() {
        assert!(matches!(DeviceAddress::parse("100"), Err(McError::InvalidAddressFormat { .. })));
        assert!(matches!(DeviceAddress::parse("D"), Err(McError::InvalidAddressFormat { .. })));
        assert!(matches!(DeviceAddress::parse("D1F"), Err(McError::InvalidAddressFormat { .. })));
        assert!(matches!(DeviceAddress::parse("QQ10"), Err(McError::UnknownDeviceType { .. })));
    }

    #[test]
    fn test_key_round_trips_through_parse() {
        for info in DEVICE_TABLE.iter() {
            let addr = DeviceAddress::new(info.device, 0x2A);
            assert_eq!(DeviceAddress::parse(&addr.key()).unwrap(), addr);
        }
        let range = DeviceAddress::with_count(DeviceType::W, 0x0E, 3);
        assert_eq!(range.key_at(2), "W10");
    }

    #[test]
    fn test_series_parsing() {
        assert_eq!("iQ-R".parse::<ControllerSeries>().unwrap(), ControllerSeries::IqR);
        assert_eq!("iqr".parse::<ControllerSeries>().unwrap(), ControllerSeries::IqR);
        assert_eq!("QnA".parse::<ControllerSeries>().unwrap(), ControllerSeries::QnA);
        assert_eq!("iQ-L".parse::<ControllerSeries>().unwrap(), ControllerSeries::IqL);
        assert!("FX5".parse::<ControllerSeries>().is_err());
        assert_eq!(ControllerSeries::IqR.word_subcommand(), 0x0002);
        assert_eq!(ControllerSeries::IqL.word_subcommand(), 0x0000);
    }
}
