//! Frame dispatch and fan-out.
//!
//! The dispatcher owns both registries and is driven by the broker task one
//! event at a time. Each connection moves `Unbound -> Bound` on its first
//! frame (the JSON handshake); every later frame is decoded with the bound
//! format and routed by method.

use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionState, Outbound};
use crate::topics::{Delivery, Subscriber, TopicRegistry};
use bytes::Bytes;
use mbroker_protocol::{Envelope, Handshake, Method, ProtocolError, WireFormat};
use std::net::SocketAddr;
use std::sync::Arc;

/// Routes decoded envelopes to the topic registry and fans results out.
pub struct Dispatcher {
    connections: ConnectionRegistry,
    topics: TopicRegistry,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            topics: TopicRegistry::new(),
            metrics: None,
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    /// Records a newly accepted connection.
    pub fn connect(&mut self, id: ConnectionId, addr: SocketAddr, outbound: Outbound) {
        tracing::debug!("[{}] Registered {}", id, addr);
        self.connections.register(id, addr, outbound);
    }

    /// Tears a connection down: drops its outbound queue and removes it from
    /// every topic. Safe to call more than once.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if self.connections.unregister(id).is_some() {
            let removed = self.topics.purge_connection(id);
            tracing::debug!("[{}] Unregistered, {} subscription(s) removed", id, removed);
        }
    }

    /// Handles one complete frame payload from a connection.
    ///
    /// An error means the connection must be torn down; ignorable conditions
    /// are logged and swallowed here.
    pub fn handle_frame(&mut self, id: ConnectionId, payload: &[u8]) -> Result<(), ServerError> {
        if payload.is_empty() {
            tracing::debug!("[{}] Skipping empty frame", id);
            return Ok(());
        }

        match self.connections.state(id) {
            None => {
                tracing::debug!("[{}] Frame for closed connection dropped", id);
                Ok(())
            }
            Some(ConnectionState::Unbound) => self.handle_handshake(id, payload),
            Some(ConnectionState::Bound(codec)) => match codec.decode(payload) {
                Ok(envelope) => {
                    self.handle_envelope(id, codec, envelope);
                    Ok(())
                }
                Err(e) if e.is_ignorable() => {
                    tracing::debug!("[{}] Ignoring envelope: {}", id, e);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    fn handle_handshake(&mut self, id: ConnectionId, payload: &[u8]) -> Result<(), ServerError> {
        let codec = Handshake::decode(payload)?;
        self.connections.bind_codec(id, codec)?;
        self.count_frame(Method::Ack);
        tracing::debug!("[{}] Handshake complete, format {}", id, codec);
        Ok(())
    }

    /// Routes a decoded envelope by method.
    pub fn handle_envelope(&mut self, id: ConnectionId, codec: WireFormat, envelope: Envelope) {
        tracing::debug!(
            "[{}] {} topic='{}'",
            id,
            envelope.method,
            envelope.topic
        );
        self.count_frame(envelope.method);

        if !envelope.method.is_client_request() {
            tracing::debug!("[{}] Ignoring {} from client", id, envelope.method);
            return;
        }

        match envelope.method {
            Method::Publish => {
                if self.reject_empty_topic(id, &envelope) {
                    return;
                }
                let delivery = self.topics.publish(&envelope.topic, envelope.payload);
                self.update_topic_gauge();
                self.deliver(delivery);
            }
            Method::Subscribe => {
                if self.reject_empty_topic(id, &envelope) {
                    return;
                }
                let retained = self.topics.subscribe(&envelope.topic, id, codec);
                self.update_topic_gauge();
                if let Some(delivery) = retained {
                    self.deliver(delivery);
                }
            }
            Method::Unsubscription => {
                if self.reject_empty_topic(id, &envelope) {
                    return;
                }
                if !self.topics.unsubscribe(&envelope.topic, id) {
                    tracing::debug!("[{}] Not subscribed to '{}'", id, envelope.topic);
                }
            }
            Method::ListTopics => {
                let answer = Envelope::list_topics_answer(envelope.topic, self.topics.list_topics());
                self.reply(id, codec, answer);
            }
            // Filtered out above
            Method::ListTopicsAnswer | Method::Message | Method::LastMessage | Method::Ack => {}
        }
    }

    fn reject_empty_topic(&self, id: ConnectionId, envelope: &Envelope) -> bool {
        if envelope.topic.is_empty() {
            tracing::warn!("[{}] {} with empty topic ignored", id, envelope.method);
            true
        } else {
            false
        }
    }

    fn reply(&mut self, id: ConnectionId, codec: WireFormat, envelope: Envelope) {
        self.deliver(Delivery {
            envelope,
            recipients: vec![Subscriber {
                connection: id,
                codec,
            }],
        });
    }

    /// Encodes the envelope once per wire format in use and enqueues the
    /// shared frame on every recipient.
    fn deliver(&mut self, delivery: Delivery) {
        let mut frames: [Option<Result<Bytes, ProtocolError>>; 3] = [None, None, None];
        let mut failed: Vec<ConnectionId> = Vec::new();

        for recipient in &delivery.recipients {
            let slot = &mut frames[format_index(recipient.codec)];
            let frame = slot.get_or_insert_with(|| {
                recipient
                    .codec
                    .encode_frame(&delivery.envelope)
                    .map(|buf| buf.freeze())
            });

            match frame {
                Ok(bytes) => {
                    if self.connections.send(recipient.connection, bytes.clone()) {
                        if let Some(ref metrics) = self.metrics {
                            metrics
                                .deliveries_total
                                .with_label_values(&[delivery.envelope.method.as_str()])
                                .inc();
                        }
                    } else {
                        tracing::debug!(
                            "[{}] Delivery dropped, connection closing",
                            recipient.connection
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] Cannot encode {} on '{}': {}",
                        recipient.connection,
                        delivery.envelope.method,
                        delivery.envelope.topic,
                        e
                    );
                    failed.push(recipient.connection);
                }
            }
        }

        for id in failed {
            self.disconnect(id);
        }
    }

    fn count_frame(&self, method: Method) {
        if let Some(ref metrics) = self.metrics {
            metrics
                .frames_total
                .with_label_values(&[method.as_str()])
                .inc();
        }
    }

    fn update_topic_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.topics.set(self.topics.topic_count() as f64);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn format_index(format: WireFormat) -> usize {
    match format {
        WireFormat::Json => 0,
        WireFormat::Xml => 1,
        WireFormat::Binary => 2,
    }
}
