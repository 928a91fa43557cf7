//! # mbroker-protocol
//!
//! Wire protocol for the mbroker pub/sub broker.
//!
//! This crate provides:
//! - Length-prefixed framing (2-byte big-endian length)
//! - The JSON handshake that selects a connection's wire format
//! - JSON, XML and tagged binary envelope codecs

pub mod binary;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod xml;

pub use binary::BinaryCodec;
pub use codec::{Codec, FrameDecoder, JsonCodec, WireFormat};
pub use error::ProtocolError;
pub use frame::{Frame, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{Envelope, Handshake, Method};
pub use xml::XmlCodec;

/// Re-exported so downstream crates build payloads without a direct dependency.
pub use serde_json::{json, Value};

/// Default port for the broker.
pub const DEFAULT_PORT: u16 = 5000;
