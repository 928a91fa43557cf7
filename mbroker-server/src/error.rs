//! Server error types.

use crate::registry::ConnectionId;
use mbroker_protocol::ProtocolError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("connection {0} has not completed the handshake")]
    NotBound(ConnectionId),

    #[error("connection {0} already negotiated a wire format")]
    AlreadyBound(ConnectionId),

    #[error("server shutting down")]
    ShuttingDown,

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ServerError {
    /// Returns whether this error ends the connection it occurred on.
    ///
    /// Errors never propagate past a single connection; the broker keeps
    /// serving everyone else.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            ServerError::Protocol(e) => !e.is_ignorable(),
            ServerError::UnknownConnection(_) | ServerError::Metrics(_) => false,
            ServerError::Io(_)
            | ServerError::NotBound(_)
            | ServerError::AlreadyBound(_)
            | ServerError::ShuttingDown => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_fatal() {
        let unknown = ServerError::Protocol(ProtocolError::UnknownMethod("PING".to_string()));
        assert!(!unknown.is_connection_fatal());

        let bad_xml = ServerError::Protocol(ProtocolError::Xml("eof".to_string()));
        assert!(bad_xml.is_connection_fatal());

        assert!(ServerError::AlreadyBound(ConnectionId::new(1)).is_connection_fatal());
        assert!(!ServerError::UnknownConnection(ConnectionId::new(1)).is_connection_fatal());
        assert!(ServerError::Io(std::io::ErrorKind::ConnectionReset.into()).is_connection_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ServerError::NotBound(ConnectionId::new(7));
        assert!(err.to_string().contains("conn 7"));
    }
}
