//! Envelope and handshake types.

use crate::codec::WireFormat;
use crate::error::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Envelope methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    // Client to broker
    Publish,
    Subscribe,
    Unsubscription,
    ListTopics,

    // Broker to client
    ListTopicsAnswer,
    Message,
    LastMessage,

    // Handshake
    Ack,
}

impl Method {
    /// All methods, in binary tag order.
    pub const ALL: [Method; 8] = [
        Method::Publish,
        Method::Subscribe,
        Method::Unsubscription,
        Method::ListTopics,
        Method::ListTopicsAnswer,
        Method::Message,
        Method::LastMessage,
        Method::Ack,
    ];

    /// Returns the wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Publish => "PUBLISH",
            Method::Subscribe => "SUBSCRIBE",
            Method::Unsubscription => "UNSUBSCRIPTION",
            Method::ListTopics => "LIST_TOPICS",
            Method::ListTopicsAnswer => "LIST_TOPICS_ANSWER",
            Method::Message => "MESSAGE",
            Method::LastMessage => "LAST_MESSAGE",
            Method::Ack => "ACK",
        }
    }

    /// Returns the binary codec tag (1-based).
    pub fn tag(&self) -> u8 {
        match self {
            Method::Publish => 1,
            Method::Subscribe => 2,
            Method::Unsubscription => 3,
            Method::ListTopics => 4,
            Method::ListTopicsAnswer => 5,
            Method::Message => 6,
            Method::LastMessage => 7,
            Method::Ack => 8,
        }
    }

    /// Looks up a method by its binary codec tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.tag() == tag)
    }

    /// Returns whether clients may send this method after the handshake.
    pub fn is_client_request(&self) -> bool {
        matches!(
            self,
            Method::Publish | Method::Subscribe | Method::Unsubscription | Method::ListTopics
        )
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of exchange after framing: `(method, topic, payload)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub method: Method,
    pub topic: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new(method: Method, topic: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            method,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Method::Publish, topic, value)
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::new(Method::Subscribe, topic, "")
    }

    /// The payload repeats the topic name.
    pub fn unsubscription(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self::new(Method::Unsubscription, topic.clone(), topic)
    }

    pub fn list_topics(topic: impl Into<String>) -> Self {
        Self::new(Method::ListTopics, topic, "")
    }

    pub fn list_topics_answer(topic: impl Into<String>, topics: Vec<String>) -> Self {
        Self::new(Method::ListTopicsAnswer, topic, topics)
    }

    pub fn message(topic: impl Into<String>, value: Value) -> Self {
        Self::new(Method::Message, topic, value)
    }

    pub fn last_message(topic: impl Into<String>, value: Value) -> Self {
        Self::new(Method::LastMessage, topic, value)
    }

    /// Returns the payload as a list of topic names, if it is one.
    pub fn topic_list(&self) -> Option<Vec<String>> {
        match &self.payload {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }
}

/// Handshake sent as the first frame of every connection.
///
/// Always JSON-encoded, whatever format it selects:
/// `{"method":"ACK","Serializer":"JSONQueue"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub method: String,
    #[serde(rename = "Serializer")]
    pub serializer: String,
}

impl Handshake {
    pub fn new(format: WireFormat) -> Self {
        Self {
            method: Method::Ack.as_str().to_string(),
            serializer: format.handshake_id().to_string(),
        }
    }

    /// Encodes the handshake payload (unframed).
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a handshake payload and returns the selected wire format.
    pub fn decode(payload: &[u8]) -> Result<WireFormat, ProtocolError> {
        let handshake: Handshake = serde_json::from_slice(payload)?;
        if handshake.method != Method::Ack.as_str() {
            return Err(ProtocolError::ExpectedHandshake(handshake.method));
        }
        handshake.serializer.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names_roundtrip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
            assert_eq!(Method::from_tag(method.tag()), Some(method));
        }
    }

    #[test]
    fn test_method_serde_matches_wire_name() {
        for method in Method::ALL {
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.as_str()));
        }
    }

    #[test]
    fn test_unknown_method() {
        let err = "DELETE_TOPIC".parse::<Method>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMethod(ref m) if m == "DELETE_TOPIC"));
        assert!(err.is_ignorable());

        assert_eq!(Method::from_tag(0), None);
        assert_eq!(Method::from_tag(9), None);
    }

    #[test]
    fn test_client_requests() {
        assert!(Method::Publish.is_client_request());
        assert!(Method::ListTopics.is_client_request());
        assert!(!Method::Message.is_client_request());
        assert!(!Method::Ack.is_client_request());
    }

    #[test]
    fn test_envelope_constructors() {
        let env = Envelope::unsubscription("weather");
        assert_eq!(env.method, Method::Unsubscription);
        assert_eq!(env.payload, json!("weather"));

        let env = Envelope::subscribe("weather");
        assert_eq!(env.payload, json!(""));

        let env = Envelope::list_topics_answer("x", vec!["a".to_string(), "b".to_string()]);
        assert_eq!(env.payload, json!(["a", "b"]));
        assert_eq!(
            env.topic_list(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(Envelope::publish("x", 1).topic_list(), None);
    }

    #[test]
    fn test_handshake_wire_shape() {
        let payload = Handshake::new(WireFormat::Xml).encode().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value, json!({"method": "ACK", "Serializer": "XMLQueue"}));
    }

    #[test]
    fn test_handshake_decode() {
        let format = Handshake::decode(br#"{"method":"ACK","Serializer":"JSONQueue"}"#).unwrap();
        assert_eq!(format, WireFormat::Json);

        let format = Handshake::decode(br#"{"method":"ACK","Serializer":"PickleQueue"}"#).unwrap();
        assert_eq!(format, WireFormat::Binary);
    }

    #[test]
    fn test_handshake_rejects_other_methods() {
        let result = Handshake::decode(br#"{"method":"PUBLISH","Serializer":"JSONQueue"}"#);
        assert!(matches!(result, Err(ProtocolError::ExpectedHandshake(_))));
    }

    #[test]
    fn test_handshake_rejects_unknown_format() {
        let result = Handshake::decode(br#"{"method":"ACK","Serializer":"YAMLQueue"}"#);
        assert!(matches!(result, Err(ProtocolError::UnknownFormat(_))));

        let result = Handshake::decode(b"<data/>");
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }
}
