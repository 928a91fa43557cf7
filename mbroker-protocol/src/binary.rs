//! Tagged binary envelope codec.
//!
//! Record layout (all integers big-endian):
//!
//! ```text
//! +--------+--------+----------+-----------+-------------+
//! | magic  | method | reserved | topic_len | topic       |
//! | 2 bytes| 1 byte | 1 byte   | 2 bytes   | topic_len   |
//! +--------+--------+----------+-----------+-------------+
//! | payload_tag | payload_len | payload                  |
//! | 1 byte      | 4 bytes     | payload_len bytes        |
//! +-------------+-------------+--------------------------+
//! ```
//!
//! Method tags follow [`Method::tag`]. Payload tags: 0 = null (no bytes),
//! 1 = UTF-8 string, 2 = JSON-encoded value.

use crate::codec::Codec;
use crate::error::ProtocolError;
use crate::message::{Envelope, Method};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

/// Magic bytes identifying binary envelopes: "MB"
pub const BINARY_MAGIC: [u8; 2] = *b"MB";

/// Size of the fixed part of a record (magic + method + reserved + topic_len
/// + payload_tag + payload_len).
pub const BINARY_FIXED_SIZE: usize = 2 + 1 + 1 + 2 + 1 + 4;

/// Payload type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadTag {
    Null = 0,
    String = 1,
    Json = 2,
}

impl TryFrom<u8> for PayloadTag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadTag::Null),
            1 => Ok(PayloadTag::String),
            2 => Ok(PayloadTag::Json),
            _ => Err(ProtocolError::Binary(format!(
                "unknown payload tag: {}",
                value
            ))),
        }
    }
}

/// Tagged binary record codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        let topic = envelope.topic.as_bytes();
        let topic_len = u16::try_from(topic.len()).map_err(|_| {
            ProtocolError::Binary(format!("topic too long: {} bytes", topic.len()))
        })?;

        let (tag, body) = match &envelope.payload {
            Value::Null => (PayloadTag::Null, Bytes::new()),
            Value::String(s) => (PayloadTag::String, Bytes::copy_from_slice(s.as_bytes())),
            other => (PayloadTag::Json, Bytes::from(serde_json::to_vec(other)?)),
        };
        let body_len = u32::try_from(body.len()).map_err(|_| {
            ProtocolError::Binary(format!("payload too long: {} bytes", body.len()))
        })?;

        let mut buf = BytesMut::with_capacity(BINARY_FIXED_SIZE + topic.len() + body.len());

        // Magic (2 bytes)
        buf.put_slice(&BINARY_MAGIC);

        // Method (1 byte)
        buf.put_u8(envelope.method.tag());

        // Reserved (1 byte)
        buf.put_u8(0);

        // Topic
        buf.put_u16(topic_len);
        buf.put_slice(topic);

        // Payload
        buf.put_u8(tag as u8);
        buf.put_u32(body_len);
        buf.put_slice(&body);

        Ok(buf.freeze())
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope, ProtocolError> {
        let mut buf = payload;

        if buf.remaining() < BINARY_FIXED_SIZE {
            return Err(ProtocolError::Binary(format!(
                "record too short: {} bytes",
                buf.remaining()
            )));
        }

        let mut magic = [0u8; 2];
        buf.copy_to_slice(&mut magic);
        if magic != BINARY_MAGIC {
            return Err(ProtocolError::Binary(format!(
                "invalid magic bytes: {:?}",
                magic
            )));
        }

        let method_tag = buf.get_u8();
        let _reserved = buf.get_u8();

        let topic_len = buf.get_u16() as usize;
        if buf.remaining() < topic_len + 5 {
            return Err(ProtocolError::Binary("truncated topic".to_string()));
        }
        let topic = std::str::from_utf8(&buf[..topic_len])
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_string();
        buf.advance(topic_len);

        let tag = PayloadTag::try_from(buf.get_u8())?;
        let body_len = buf.get_u32() as usize;
        if buf.remaining() != body_len {
            return Err(ProtocolError::Binary(format!(
                "payload length {} does not match remaining {} bytes",
                body_len,
                buf.remaining()
            )));
        }

        let payload = match tag {
            PayloadTag::Null => {
                if body_len != 0 {
                    return Err(ProtocolError::Binary("null payload with body".to_string()));
                }
                Value::Null
            }
            PayloadTag::String => Value::String(
                std::str::from_utf8(buf)
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_string(),
            ),
            PayloadTag::Json => serde_json::from_slice(buf)?,
        };

        // Resolve the method last so a record with an unknown method is
        // otherwise validated before being reported as ignorable.
        let method = Method::from_tag(method_tag)
            .ok_or_else(|| ProtocolError::UnknownMethod(format!("tag {}", method_tag)))?;

        Ok(Envelope {
            method,
            topic,
            payload,
        })
    }
}
