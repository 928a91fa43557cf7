//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use mbroker_protocol::{Envelope, Method, Value, WireFormat};
use std::collections::VecDeque;

/// What a queue does with its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Subscribes on connect and pulls messages.
    Consumer,
    /// Publishes values.
    Producer,
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Producer => "producer",
        }
    }
}

/// A client bound to one topic, in one role, using one wire format.
pub struct Queue {
    conn: Connection,
    topic: String,
    role: Role,
    /// Messages read while waiting for a different reply.
    pending: VecDeque<(String, Value)>,
}

impl Queue {
    /// Connects to the broker. Consumers subscribe to `topic` immediately.
    pub async fn connect(
        config: ConnectionConfig,
        topic: impl Into<String>,
        role: Role,
        format: WireFormat,
    ) -> Result<Self, ClientError> {
        let mut conn = Connection::new(config, format);
        conn.connect().await?;

        let topic = topic.into();
        if role == Role::Consumer {
            conn.send(&Envelope::subscribe(topic.clone())).await?;
        }

        Ok(Self {
            conn,
            topic,
            role,
            pending: VecDeque::new(),
        })
    }

    /// Publishes a value to the queue's topic.
    pub async fn push(&mut self, value: impl Into<Value>) -> Result<(), ClientError> {
        if self.role != Role::Producer {
            return Err(ClientError::WrongRole(self.role.name()));
        }
        self.conn
            .send(&Envelope::publish(self.topic.clone(), value))
            .await
    }

    /// Waits for the next delivered message and returns `(topic, value)`.
    ///
    /// The topic may differ from the queue's own when the broker delivers
    /// from a topic created under it.
    pub async fn pull(&mut self) -> Result<(String, Value), ClientError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }

        loop {
            let envelope = self.conn.recv().await?;
            match envelope.method {
                Method::Message | Method::LastMessage => {
                    return Ok((envelope.topic, envelope.payload));
                }
                other => {
                    tracing::debug!("pull: skipping {}", other);
                }
            }
        }
    }

    /// Asks the broker for every topic that has been published to.
    pub async fn list_topics(&mut self) -> Result<Vec<String>, ClientError> {
        self.conn
            .send(&Envelope::list_topics(self.topic.clone()))
            .await?;

        loop {
            let envelope = self.conn.recv_timeout().await?;
            match envelope.method {
                Method::ListTopicsAnswer => return parse_topic_list(&envelope),
                Method::Message | Method::LastMessage => {
                    self.pending.push_back((envelope.topic, envelope.payload));
                }
                other => {
                    tracing::debug!("list_topics: skipping {}", other);
                }
            }
        }
    }

    /// Unsubscribes from the queue's topic.
    pub async fn cancel(&mut self) -> Result<(), ClientError> {
        self.conn
            .send(&Envelope::unsubscription(self.topic.clone()))
            .await
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn format(&self) -> WireFormat {
        self.conn.format()
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }
}

/// Extracts the topic names from a `LIST_TOPICS_ANSWER`.
///
/// XML carries the list as JSON text, so a string payload is parsed once more.
fn parse_topic_list(envelope: &Envelope) -> Result<Vec<String>, ClientError> {
    if let Some(topics) = envelope.topic_list() {
        return Ok(topics);
    }

    let unexpected = || ClientError::UnexpectedReply {
        method: envelope.method,
        detail: format!("payload is not a topic list: {}", envelope.payload),
    };

    match &envelope.payload {
        Value::String(text) => serde_json::from_str(text).map_err(|_| unexpected()),
        _ => Err(unexpected()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbroker_protocol::json;

    #[test]
    fn test_parse_topic_list_json() {
        let env = Envelope::list_topics_answer("t", vec!["a".to_string(), "b".to_string()]);
        assert_eq!(parse_topic_list(&env).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_parse_topic_list_xml_text() {
        let env = Envelope::new(Method::ListTopicsAnswer, "t", r#"["a","b/c"]"#);
        assert_eq!(parse_topic_list(&env).unwrap(), vec!["a", "b/c"]);

        let env = Envelope::new(Method::ListTopicsAnswer, "t", "[]");
        assert!(parse_topic_list(&env).unwrap().is_empty());
    }

    #[test]
    fn test_parse_topic_list_rejects_other_payloads() {
        let env = Envelope::new(Method::ListTopicsAnswer, "t", json!(42));
        assert!(matches!(
            parse_topic_list(&env),
            Err(ClientError::UnexpectedReply { .. })
        ));

        let env = Envelope::new(Method::ListTopicsAnswer, "t", "not json");
        assert!(parse_topic_list(&env).is_err());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Consumer.name(), "consumer");
        assert_eq!(Role::Producer.name(), "producer");
    }
}
