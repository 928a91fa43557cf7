//! Topic registry.
//!
//! Maps topic names to their retained value and ordered subscriber list.
//!
//! Topic names are hierarchical by literal string prefix: when a topic is
//! first created it copies the subscribers of every known topic whose name is
//! a prefix of its own. The copy happens once, at creation; later changes to
//! either side are not propagated.

use crate::registry::ConnectionId;
use mbroker_protocol::{Envelope, Value, WireFormat};
use std::collections::HashMap;

/// A subscriber entry: who receives, and in which format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscriber {
    pub connection: ConnectionId,
    pub codec: WireFormat,
}

/// An envelope and the connections it must be delivered to, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub envelope: Envelope,
    pub recipients: Vec<Subscriber>,
}

#[derive(Debug, Default)]
struct Topic {
    retained: Option<Value>,
    subscribers: Vec<Subscriber>,
}

impl Topic {
    fn contains(&self, connection: ConnectionId) -> bool {
        self.subscribers.iter().any(|s| s.connection == connection)
    }
}

/// Registry of every topic the broker has seen.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, Topic>,
    /// Topic names in creation order.
    created: Vec<String>,
    /// Topic names in first-publish order.
    published: Vec<String>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` as the retained value of `topic` and addresses a
    /// `MESSAGE` to every current subscriber.
    pub fn publish(&mut self, topic: &str, value: Value) -> Delivery {
        self.ensure_topic(topic);
        if !self.published.iter().any(|t| t == topic) {
            self.published.push(topic.to_string());
        }

        let entry = self.topic_mut(topic);
        entry.retained = Some(value.clone());
        let recipients = entry.subscribers.clone();

        Delivery {
            envelope: Envelope::message(topic, value),
            recipients,
        }
    }

    /// Subscribes a connection to `topic`.
    ///
    /// Subscribing twice leaves a single entry. If the topic holds a retained
    /// value, the subscriber gets it as `LAST_MESSAGE`, re-subscribes included.
    pub fn subscribe(
        &mut self,
        topic: &str,
        connection: ConnectionId,
        codec: WireFormat,
    ) -> Option<Delivery> {
        self.ensure_topic(topic);
        let entry = self.topic_mut(topic);
        if !entry.contains(connection) {
            entry.subscribers.push(Subscriber { connection, codec });
        }

        entry.retained.clone().map(|value| Delivery {
            envelope: Envelope::last_message(topic, value),
            recipients: vec![Subscriber { connection, codec }],
        })
    }

    /// Removes a connection from `topic`. Returns whether an entry was removed.
    pub fn unsubscribe(&mut self, topic: &str, connection: ConnectionId) -> bool {
        match self.topics.get_mut(topic) {
            Some(entry) => {
                let before = entry.subscribers.len();
                entry.subscribers.retain(|s| s.connection != connection);
                entry.subscribers.len() != before
            }
            None => false,
        }
    }

    /// Returns topics that have been published to, in first-publish order.
    pub fn list_topics(&self) -> Vec<String> {
        self.published.clone()
    }

    /// Removes a connection from every topic. Returns the number of entries removed.
    pub fn purge_connection(&mut self, connection: ConnectionId) -> usize {
        let mut removed = 0;
        for entry in self.topics.values_mut() {
            let before = entry.subscribers.len();
            entry.subscribers.retain(|s| s.connection != connection);
            removed += before - entry.subscribers.len();
        }
        removed
    }

    pub fn subscribers(&self, topic: &str) -> Vec<Subscriber> {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.clone())
            .unwrap_or_default()
    }

    pub fn retained(&self, topic: &str) -> Option<&Value> {
        self.topics.get(topic).and_then(|t| t.retained.as_ref())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Number of known topics, including those only ever subscribed to.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Creates `topic` if it is new, inheriting the subscribers of every
    /// known prefix topic.
    fn ensure_topic(&mut self, topic: &str) {
        if self.topics.contains_key(topic) {
            return;
        }

        let mut inherited: Vec<Subscriber> = Vec::new();
        for parent in &self.created {
            if !topic.starts_with(parent.as_str()) {
                continue;
            }
            if let Some(entry) = self.topics.get(parent) {
                for sub in &entry.subscribers {
                    if !inherited.iter().any(|s| s.connection == sub.connection) {
                        inherited.push(*sub);
                    }
                }
            }
        }

        if !inherited.is_empty() {
            tracing::debug!(
                "Topic '{}' created with {} inherited subscriber(s)",
                topic,
                inherited.len()
            );
        }

        self.topics.insert(
            topic.to_string(),
            Topic {
                retained: None,
                subscribers: inherited,
            },
        );
        self.created.push(topic.to_string());
    }

    fn topic_mut(&mut self, topic: &str) -> &mut Topic {
        self.topics.entry(topic.to_string()).or_default()
    }
}
