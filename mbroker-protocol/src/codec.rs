//! Wire formats and the buffering frame decoder.

use crate::binary::BinaryCodec;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Envelope;
use crate::xml::XmlCodec;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Encodes and decodes envelopes for one wire format.
///
/// Implementations are stateless; `payload` is the body of a single frame.
pub trait Codec: Send + Sync {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError>;

    fn decode(&self, payload: &[u8]) -> Result<Envelope, ProtocolError>;
}

/// Wire format negotiated by a connection's handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// `{"method": .., "topic": .., "msg": ..}`
    Json,
    /// `<data method=".." topic=".."><msg>..</msg></data>`
    Xml,
    /// Tagged binary record, see [`crate::binary`].
    Binary,
}

impl WireFormat {
    pub const ALL: [WireFormat; 3] = [WireFormat::Json, WireFormat::Xml, WireFormat::Binary];

    /// Returns the identifier clients send in the handshake.
    pub fn handshake_id(&self) -> &'static str {
        match self {
            WireFormat::Json => "JSONQueue",
            WireFormat::Xml => "XMLQueue",
            WireFormat::Binary => "BinaryQueue",
        }
    }

    /// Returns the codec implementing this format.
    pub fn codec(&self) -> &'static dyn Codec {
        match self {
            WireFormat::Json => &JsonCodec,
            WireFormat::Xml => &XmlCodec,
            WireFormat::Binary => &BinaryCodec,
        }
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        self.codec().encode(envelope)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Envelope, ProtocolError> {
        self.codec().decode(payload)
    }

    /// Encodes an envelope and wraps it in a length-prefixed frame.
    pub fn encode_frame(&self, envelope: &Envelope) -> Result<BytesMut, ProtocolError> {
        Frame::new(self.encode(envelope)?).encode()
    }
}

impl FromStr for WireFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JSONQueue" | "json" => Ok(WireFormat::Json),
            "XMLQueue" | "xml" => Ok(WireFormat::Xml),
            // PickleQueue is the legacy name for the binary format
            "BinaryQueue" | "PickleQueue" | "binary" => Ok(WireFormat::Binary),
            other => Err(ProtocolError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handshake_id())
    }
}

#[derive(Serialize)]
struct JsonEnvelopeRef<'a> {
    method: &'a str,
    topic: &'a str,
    msg: &'a Value,
}

#[derive(Deserialize)]
struct JsonEnvelope {
    method: Option<String>,
    topic: Option<String>,
    #[serde(default)]
    msg: Value,
}

/// JSON object codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        let wire = JsonEnvelopeRef {
            method: envelope.method.as_str(),
            topic: &envelope.topic,
            msg: &envelope.payload,
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope, ProtocolError> {
        let wire: JsonEnvelope = serde_json::from_slice(payload)?;
        let method = wire
            .method
            .ok_or(ProtocolError::MissingField("method"))?
            .parse()?;
        let topic = wire.topic.ok_or(ProtocolError::MissingField("topic"))?;
        Ok(Envelope {
            method,
            topic,
            payload: wire.msg,
        })
    }
}

/// Accumulates socket reads and yields complete frame payloads.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to take the next complete frame payload from the buffer.
    pub fn decode_frame(&mut self) -> Option<Bytes> {
        Frame::decode(&mut self.buffer).map(|frame| frame.payload)
    }

    /// Called when the peer closed the stream.
    ///
    /// A clean close happens on a frame boundary; anything still buffered is
    /// a truncated frame.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TruncatedFrame {
                buffered: self.buffer.len(),
            })
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Method;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_ids() {
        for format in WireFormat::ALL {
            assert_eq!(format.handshake_id().parse::<WireFormat>().unwrap(), format);
            assert_eq!(format.to_string(), format.handshake_id());
        }
        assert_eq!("PickleQueue".parse::<WireFormat>().unwrap(), WireFormat::Binary);
        assert_eq!("xml".parse::<WireFormat>().unwrap(), WireFormat::Xml);
        assert!(matches!(
            "CSVQueue".parse::<WireFormat>(),
            Err(ProtocolError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_json_wire_shape() {
        let env = Envelope::publish("news", "hello");
        let bytes = JsonCodec.encode(&env).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"method": "PUBLISH", "topic": "news", "msg": "hello"})
        );
    }

    #[test]
    fn test_json_structured_payload() {
        let env = Envelope::publish("sensors/temp", json!({"celsius": 21.5}));
        let bytes = JsonCodec.encode(&env).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_json_missing_fields() {
        let result = JsonCodec.decode(br#"{"topic":"a","msg":"b"}"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("method"))));

        let result = JsonCodec.decode(br#"{"method":"PUBLISH","msg":"b"}"#);
        assert!(matches!(result, Err(ProtocolError::MissingField("topic"))));

        // msg is optional
        let env = JsonCodec
            .decode(br#"{"method":"LIST_TOPICS","topic":"a"}"#)
            .unwrap();
        assert_eq!(env.method, Method::ListTopics);
        assert_eq!(env.payload, Value::Null);
    }

    #[test]
    fn test_json_unknown_method() {
        let result = JsonCodec.decode(br#"{"method":"PURGE","topic":"a","msg":""}"#);
        assert!(matches!(result, Err(ProtocolError::UnknownMethod(ref m)) if m == "PURGE"));
    }

    #[test]
    fn test_json_malformed() {
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_encode_frame() {
        let env = Envelope::subscribe("a");
        let framed = WireFormat::Json.encode_frame(&env).unwrap();
        let body = WireFormat::Json.encode(&env).unwrap();
        assert_eq!(framed.len(), body.len() + 2);
        assert_eq!(&framed[2..], body.as_ref());
    }

    #[test]
    fn test_empty_string_roundtrip_all_formats() {
        for format in WireFormat::ALL {
            let env = Envelope::publish("t", "");
            let decoded = format.decode(&format.encode(&env).unwrap()).unwrap();
            assert_eq!(decoded, env, "format {}", format);
        }
    }

    #[test]
    fn test_frame_decoder_partial_reads() {
        let framed = WireFormat::Json
            .encode_frame(&Envelope::publish("a", "b"))
            .unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&framed[..1]);
        assert!(decoder.decode_frame().is_none());
        assert!(decoder.finish().is_err());

        decoder.extend(&framed[1..5]);
        assert!(decoder.decode_frame().is_none());

        decoder.extend(&framed[5..]);
        let payload = decoder.decode_frame().unwrap();
        assert_eq!(
            WireFormat::Json.decode(&payload).unwrap(),
            Envelope::publish("a", "b")
        );
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_frame_decoder_clear() {
        let mut decoder = FrameDecoder::default();
        decoder.extend(b"\x00\x09abc");
        assert_eq!(decoder.buffered(), 5);
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    proptest! {
        #[test]
        fn prop_ascii_roundtrip_all_formats(
            method_idx in 0usize..8,
            topic in "[ -~]{1,32}",
            payload in "[ -~]{0,64}",
        ) {
            let env = Envelope::new(Method::ALL[method_idx], topic, payload);
            for format in WireFormat::ALL {
                let decoded = format.decode(&format.encode(&env).unwrap()).unwrap();
                prop_assert_eq!(&decoded, &env);
            }
        }
    }
}
