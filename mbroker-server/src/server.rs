//! TCP server implementation.
//!
//! One broker task owns the [`Dispatcher`]. The accept loop spawns an I/O
//! task per connection; I/O tasks forward complete frames to the broker task
//! as [`BrokerEvent`]s and drain their own outbound queue, so a slow reader
//! never stalls delivery to anyone else.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::registry::{ConnectionId, Outbound};
use bytes::Bytes;
use mbroker_protocol::FrameDecoder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Socket read buffer size per connection.
    pub read_buffer_size: usize,
    /// Capacity of the I/O task to broker task channel.
    pub event_queue_capacity: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("event_queue_capacity", &self.event_queue_capacity)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builds the runtime configuration from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            read_buffer_size: config.network.read_buffer_size.max(1),
            event_queue_capacity: config.broker.event_queue_capacity.max(1),
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Message from the accept loop or a connection task to the broker task.
#[derive(Debug)]
pub enum BrokerEvent {
    /// A connection was accepted. Always the first event for `id`.
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
        outbound: Outbound,
    },
    /// A complete frame payload arrived.
    Frame { id: ConnectionId, payload: Bytes },
    /// The connection's I/O task ended.
    Disconnected { id: ConnectionId },
}

/// TCP server for mbroker.
pub struct Server {
    config: ServerConfig,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let broker_shutdown = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_capacity);
        let mut dispatcher = Dispatcher::new();
        if let Some(ref metrics) = self.config.metrics {
            dispatcher = dispatcher.with_metrics(metrics.clone());
        }
        let broker = tokio::spawn(Self::run_broker(
            dispatcher,
            events_rx,
            broker_shutdown,
            self.stats.clone(),
            self.config.metrics.clone(),
        ));

        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            next_id += 1;
                            let id = ConnectionId::new(next_id);

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                            let connected = BrokerEvent::Connected { id, addr, outbound: outbound_tx };
                            if events_tx.send(connected).await.is_err() {
                                tracing::error!("Broker task stopped, no longer accepting");
                                break;
                            }

                            let events = events_tx.clone();
                            let stats = self.stats.clone();
                            let metrics = self.config.metrics.clone();
                            let read_buffer_size = self.config.read_buffer_size;
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!("Client connected: {} ({})", addr, id);

                                let result = Self::handle_connection(
                                    tcp_stream,
                                    id,
                                    addr,
                                    outbound_rx,
                                    events.clone(),
                                    read_buffer_size,
                                    &mut conn_shutdown,
                                )
                                .await;

                                match result {
                                    Ok(()) | Err(ServerError::ShuttingDown) => {}
                                    Err(e) => {
                                        tracing::debug!("Connection {} error: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                }

                                let _ = events.send(BrokerEvent::Disconnected { id }).await;
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                if let Some(ref metrics) = metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        drop(events_tx);
        if let Err(e) = broker.await {
            tracing::error!("Broker task failed: {}", e);
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Owns all broker state and applies events one at a time.
    async fn run_broker(
        mut dispatcher: Dispatcher,
        mut events: mpsc::Receiver<BrokerEvent>,
        mut shutdown: broadcast::Receiver<()>,
        stats: Arc<ServerStats>,
        metrics: Option<Arc<Metrics>>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => Self::handle_event(&mut dispatcher, event, &stats, metrics.as_deref()),
                        None => break,
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        tracing::debug!(
            "Broker task stopping with {} connection(s), {} topic(s)",
            dispatcher.connections().len(),
            dispatcher.topics().topic_count()
        );
        // Dropping the dispatcher closes every outbound queue
    }

    fn handle_event(
        dispatcher: &mut Dispatcher,
        event: BrokerEvent,
        stats: &ServerStats,
        metrics: Option<&Metrics>,
    ) {
        match event {
            BrokerEvent::Connected { id, addr, outbound } => {
                dispatcher.connect(id, addr, outbound);
            }
            BrokerEvent::Frame { id, payload } => {
                stats.frames_total.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = dispatcher.handle_frame(id, &payload) {
                    if e.is_connection_fatal() {
                        tracing::warn!("[{}] Closing connection: {}", id, e);
                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        if let Some(metrics) = metrics {
                            metrics.protocol_errors_total.inc();
                        }
                        dispatcher.disconnect(id);
                    } else {
                        tracing::debug!("[{}] {}", id, e);
                    }
                }
            }
            BrokerEvent::Disconnected { id } => {
                dispatcher.disconnect(id);
            }
        }
    }

    /// Handles a single connection's socket I/O.
    async fn handle_connection(
        mut stream: TcpStream,
        id: ConnectionId,
        addr: SocketAddr,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
        events: mpsc::Sender<BrokerEvent>,
        read_buffer_size: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut decoder = FrameDecoder::with_capacity(read_buffer_size);
        let mut buf = vec![0u8; read_buffer_size];

        loop {
            // Unbiased so a busy outbound queue cannot starve reads
            tokio::select! {
                // Frames queued by the broker task
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => {
                            tracing::debug!("[{}] Writing {} bytes", addr, frame.len());
                            stream.write_all(&frame).await?;
                        }
                        None => {
                            tracing::debug!("[{}] Closed by broker", addr);
                            let _ = stream.shutdown().await;
                            return Ok(());
                        }
                    }
                }

                // Incoming data from client
                result = stream.read(&mut buf) => {
                    let n = result?;
                    if n == 0 {
                        tracing::debug!("[{}] Connection closed by client", addr);
                        decoder.finish()?;
                        return Ok(());
                    }

                    tracing::debug!("[{}] Received {} bytes", addr, n);
                    decoder.extend(&buf[..n]);

                    while let Some(payload) = decoder.decode_frame() {
                        events
                            .send(BrokerEvent::Frame { id, payload })
                            .await
                            .map_err(|_| ServerError::ShuttingDown)?;
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver notified on shutdown, for tasks running alongside
    /// the server.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
