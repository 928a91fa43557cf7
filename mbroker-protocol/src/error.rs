//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or envelope coding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed mid-frame with {buffered} bytes buffered")]
    TruncatedFrame { buffered: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("malformed binary envelope: {0}")]
    Binary(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown wire format: {0}")]
    UnknownFormat(String),

    #[error("expected ACK handshake, got {0}")]
    ExpectedHandshake(String),
}

impl ProtocolError {
    /// Returns whether the envelope can be dropped without closing the connection.
    ///
    /// The protocol has no way to signal an unknown method back to the peer,
    /// so such envelopes are skipped.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, ProtocolError::UnknownMethod(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignorable_errors() {
        assert!(ProtocolError::UnknownMethod("PING".to_string()).is_ignorable());

        assert!(!ProtocolError::InvalidUtf8.is_ignorable());
        assert!(!ProtocolError::FrameTooLarge { size: 70000, max: 65535 }.is_ignorable());
        assert!(!ProtocolError::UnknownFormat("YAMLQueue".to_string()).is_ignorable());
        assert!(!ProtocolError::Xml("bad".to_string()).is_ignorable());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge {
            size: 70000,
            max: 65535,
        };
        assert!(err.to_string().contains("70000"));

        let err = ProtocolError::TruncatedFrame { buffered: 3 };
        assert!(err.to_string().contains('3'));

        let err = ProtocolError::UnknownMethod("FETCH".to_string());
        assert!(err.to_string().contains("FETCH"));

        let err = ProtocolError::UnknownFormat("YAMLQueue".to_string());
        assert!(err.to_string().contains("YAMLQueue"));

        let err = ProtocolError::ExpectedHandshake("PUBLISH".to_string());
        assert!(err.to_string().contains("PUBLISH"));

        let err = ProtocolError::MissingField("topic");
        assert!(err.to_string().contains("topic"));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));
    }
}
