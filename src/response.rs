/// Response validation and decoding
///
/// A complete response frame is checked in a fixed order: frame long enough
/// to hold the end code, subheader matching the variant, end code zero, and
/// finally an even payload that decodes into signed 16-bit words.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::error::{McError, McResult};
use crate::frame::{FrameVariant, END_CODE_WIDTH};

/// A response frame split into its end code and payload
#[derive(Debug, Clone, PartialEq)]
pub struct McResponse {
    pub variant: FrameVariant,
    pub end_code: u16,
    pub payload: Bytes,
}

impl McResponse {
    /// Split a complete response frame
    ///
    /// Only the frame length and subheader are checked here; the end code is
    /// returned as received.
    pub fn parse(frame: &Bytes, variant: FrameVariant) -> McResult<Self> {
        let end_at = variant.end_code_offset();
        if frame.len() < end_at + END_CODE_WIDTH {
            return Err(McError::malformed(format!(
                "Frame of {} bytes is shorter than the {} byte {} response header",
                frame.len(),
                end_at + END_CODE_WIDTH,
                variant
            )));
        }

        let subheader = u16::from_be_bytes([frame[0], frame[1]]);
        if subheader != variant.response_subheader() {
            return Err(McError::invalid_subheader(variant.response_subheader(), subheader));
        }

        Ok(Self {
            variant,
            end_code: LittleEndian::read_u16(&frame[end_at..end_at + END_CODE_WIDTH]),
            payload: frame.slice(variant.payload_offset()..),
        })
    }

    pub fn is_success(&self) -> bool {
        self.end_code == 0
    }

    /// Decode the payload as little-endian signed words
    ///
    /// A non-zero end code becomes `PlcError`; for error responses the
    /// payload carries diagnostic information and is not decoded.
    pub fn into_values(self) -> McResult<Vec<i16>> {
        if !self.is_success() {
            return Err(McError::plc(self.end_code));
        }
        decode_words(&self.payload)
    }
}

/// Decode a little-endian word payload
pub fn decode_words(payload: &[u8]) -> McResult<Vec<i16>> {
    if payload.len() % 2 != 0 {
        return Err(McError::malformed(format!(
            "Payload length {} is not a whole number of words",
            payload.len()
        )));
    }

    let mut values = vec![0i16; payload.len() / 2];
    LittleEndian::read_i16_into(payload, &mut values);
    Ok(values)
}

/// Validate a response frame and decode its values
pub fn decode_response(frame: &Bytes, variant: FrameVariant) -> McResult<Vec<i16>> {
    McResponse::parse(frame, variant)?.into_values()
}
