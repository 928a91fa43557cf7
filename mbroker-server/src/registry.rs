//! Connection registry.
//!
//! Tracks every live connection, its negotiated wire format and the sending
//! half of its outbound queue. Owned by the broker task; dropping an entry's
//! sender is what tells the connection's I/O task to close the socket.

use crate::error::ServerError;
use bytes::Bytes;
use mbroker_protocol::WireFormat;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Opaque handle to a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn {}", self.0)
    }
}

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake frame.
    Unbound,
    /// Handshake done; every later frame uses this format.
    Bound(WireFormat),
}

/// Sending half of a connection's outbound queue. Carries complete frames.
///
/// Unbounded: the broker task never waits on a slow reader, and a reader
/// that stops consuming grows its own queue. There is no backpressure
/// beyond the socket buffers.
pub type Outbound = mpsc::UnboundedSender<Bytes>;

struct ConnectionEntry {
    addr: SocketAddr,
    state: ConnectionState,
    outbound: Outbound,
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection in the `Unbound` state.
    pub fn register(&mut self, id: ConnectionId, addr: SocketAddr, outbound: Outbound) {
        self.connections.insert(
            id,
            ConnectionEntry {
                addr,
                state: ConnectionState::Unbound,
                outbound,
            },
        );
    }

    /// Binds the wire format chosen by the handshake. Allowed once.
    pub fn bind_codec(&mut self, id: ConnectionId, codec: WireFormat) -> Result<(), ServerError> {
        let entry = self
            .connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        match entry.state {
            ConnectionState::Unbound => {
                entry.state = ConnectionState::Bound(codec);
                Ok(())
            }
            ConnectionState::Bound(_) => Err(ServerError::AlreadyBound(id)),
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|e| e.state)
    }

    /// Returns the bound wire format of a connection.
    pub fn codec(&self, id: ConnectionId) -> Result<WireFormat, ServerError> {
        match self.state(id) {
            Some(ConnectionState::Bound(codec)) => Ok(codec),
            Some(ConnectionState::Unbound) => Err(ServerError::NotBound(id)),
            None => Err(ServerError::UnknownConnection(id)),
        }
    }

    pub fn addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|e| e.addr)
    }

    /// Enqueues a frame on the connection's outbound queue.
    ///
    /// Returns `false` if the connection is unknown or its I/O task is gone.
    pub fn send(&self, id: ConnectionId, frame: Bytes) -> bool {
        match self.connections.get(&id) {
            Some(entry) => entry.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Removes a connection, dropping its outbound sender.
    ///
    /// Callers must also purge the connection from the topic registry.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.remove(&id).map(|e| e.addr)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[test]
    fn test_register_and_bind() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(id, addr(), tx);
        assert_eq!(registry.state(id), Some(ConnectionState::Unbound));
        assert!(matches!(registry.codec(id), Err(ServerError::NotBound(_))));

        registry.bind_codec(id, WireFormat::Xml).unwrap();
        assert_eq!(registry.codec(id).unwrap(), WireFormat::Xml);
        assert_eq!(registry.addr(id), Some(addr()));
    }

    #[test]
    fn test_bind_only_once() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(id, addr(), tx);

        registry.bind_codec(id, WireFormat::Json).unwrap();
        assert!(matches!(
            registry.bind_codec(id, WireFormat::Binary),
            Err(ServerError::AlreadyBound(_))
        ));
        assert_eq!(registry.codec(id).unwrap(), WireFormat::Json);
    }

    #[test]
    fn test_unknown_connection() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(9);
        assert!(matches!(
            registry.bind_codec(id, WireFormat::Json),
            Err(ServerError::UnknownConnection(_))
        ));
        assert!(!registry.send(id, Bytes::from_static(b"x")));
        assert_eq!(registry.state(id), None);
    }

    #[test]
    fn test_send_and_unregister() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(id, addr(), tx);

        assert!(registry.send(id, Bytes::from_static(b"\x00\x01a")));
        assert_eq!(rx.try_recv().unwrap().as_ref(), b"\x00\x01a");

        assert_eq!(registry.unregister(id), Some(addr()));
        assert!(!registry.contains(id));
        assert!(registry.is_empty());
        // Sender dropped with the entry
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_send_to_closed_queue() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(id, addr(), tx);
        drop(rx);

        assert!(!registry.send(id, Bytes::from_static(b"x")));
        assert_eq!(registry.len(), 1);
    }
}
