//! Connection management.

use crate::error::ClientError;
use mbroker_protocol::{Envelope, Frame, FrameDecoder, Handshake, WireFormat};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Broker address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long to wait for a reply to a request that expects one.
    pub request_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// A framed connection to an mbroker server using one wire format.
pub struct Connection {
    config: ConnectionConfig,
    format: WireFormat,
    stream: Option<TcpStream>,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig, format: WireFormat) -> Self {
        let buf = vec![0u8; config.read_buffer_size];
        Self {
            config,
            format,
            stream: None,
            decoder: FrameDecoder::new(),
            buf,
        }
    }

    /// Connects to the broker and sends the handshake.
    ///
    /// The broker does not answer the handshake, so this returns as soon as
    /// it is written.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        self.decoder.clear();

        let handshake = Handshake::new(self.format).encode()?;
        self.write_frame(Frame::new(handshake)).await?;
        tracing::debug!("Handshake sent ({})", self.format);

        Ok(())
    }

    /// Encodes and sends one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ClientError> {
        tracing::debug!("Sending {} topic='{}'", envelope.method, envelope.topic);
        let payload = self.format.encode(envelope)?;
        self.write_frame(Frame::new(payload)).await
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Waits for the next envelope from the broker.
    ///
    /// Zero-length frames are skipped.
    pub async fn recv(&mut self) -> Result<Envelope, ClientError> {
        loop {
            while let Some(payload) = self.decoder.decode_frame() {
                if payload.is_empty() {
                    continue;
                }
                return Ok(self.format.decode(&payload)?);
            }

            let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
            let n = stream.read(&mut self.buf).await?;
            if n == 0 {
                tracing::debug!("Connection closed by broker");
                self.stream = None;
                return Err(ClientError::ConnectionClosed);
            }
            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Like [`recv`](Self::recv), bounded by the request timeout.
    pub async fn recv_timeout(&mut self) -> Result<Envelope, ClientError> {
        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("Closing connection to {}", self.config.addr);
            let _ = stream.shutdown().await;
        }
        self.decoder.clear();
        Ok(())
    }
}
