/// Stream reassembly for MC frames
///
/// TCP delivers MC frames as an arbitrary sequence of chunks. `FrameBuffer`
/// accumulates those chunks and splits out complete frames using the data
/// length field found at the end of the fixed header. Requests and responses
/// share the same length field position, so the same buffer serves the client
/// reader and the simulator.

use bytes::{Bytes, BytesMut};

use crate::error::{McError, McResult};
use crate::frame::FrameVariant;

/// Largest data length accepted in a single frame
///
/// A full 960 word response needs 1922 bytes; anything far beyond that means
/// the stream is out of sync.
pub const MAX_DATA_LENGTH: usize = 8192;

const INITIAL_CAPACITY: usize = 4 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete frames
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    variant: FrameVariant,
    max_data_length: usize,
}

impl FrameBuffer {
    pub fn new(variant: FrameVariant) -> Self {
        Self::with_max_data_length(variant, MAX_DATA_LENGTH)
    }

    pub fn with_max_data_length(variant: FrameVariant, max_data_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            variant,
            max_data_length,
        }
    }

    /// Push received bytes and extract every frame that is now complete
    ///
    /// Frames come out in arrival order, each including its fixed header.
    /// Incomplete trailing data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Fails when the header at the front of the buffer declares a data length
    /// above the configured maximum. Frames completed ahead of such a header
    /// are still returned; the error is then reported by the next push, which
    /// may be empty. Callers are expected to drop the stream on error.
    pub fn push(&mut self, data: &[u8]) -> McResult<Vec<Bytes>> {
        self.extend(data);

        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) if !frames.is_empty() => break,
                Err(e) => return Err(e),
            }
        }

        Ok(frames)
    }

    /// Append received bytes without extracting anything
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the frame at the front of the buffer, if it is complete
    ///
    /// An oversize length is reported before anything is consumed, so the
    /// offending header stays buffered.
    pub fn next_frame(&mut self) -> McResult<Option<Bytes>> {
        let header_len = self.variant.header_len();
        if self.buffer.len() < header_len {
            return Ok(None);
        }

        let at = self.variant.length_offset();
        let data_length = u16::from_le_bytes([self.buffer[at], self.buffer[at + 1]]) as usize;
        if data_length > self.max_data_length {
            return Err(McError::malformed(format!(
                "Declared data length {} exceeds maximum {}",
                data_length, self.max_data_length
            )));
        }

        let total = header_len + data_length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(total).freeze()))
    }

    pub fn variant(&self) -> FrameVariant {
        self.variant
    }

    /// Number of buffered bytes not yet part of a complete frame
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
