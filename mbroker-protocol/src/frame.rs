//! Length-prefixed frame format.
//!
//! Every message on the wire is a 2-byte big-endian length followed by that
//! many payload bytes:
//!
//! ```text
//! +-------------+-----------------------+
//! | payload_len | payload               |
//! |   2 bytes   | payload_len bytes     |
//! +-------------+-----------------------+
//! ```
//!
//! The payload is an envelope encoded with the connection's wire format.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 2;

/// Largest payload that fits in the 16-bit length prefix.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A single framed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        buf.reserve(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Some(frame)` if a complete frame was consumed from `buf`,
    /// `None` if more data is needed.
    pub fn decode(buf: &mut BytesMut) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }

        // Peek at the length without consuming
        let payload_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return None;
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();
        Some(Self { payload })
    }

    /// Returns the total encoded size of the frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}
