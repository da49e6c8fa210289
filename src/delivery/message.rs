use std::fmt;
use std::time::{Duration, Instant};

/// A message bound for the broker: the file name as key, the file bytes as value.
///
/// Fields are private so a message cannot change once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    key: String,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Ticket carried through the producer for one accepted message.
#[derive(Debug)]
pub struct InFlight {
    pub key: String,
    pub enqueued_at: Instant,
}

impl InFlight {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            enqueued_at: Instant::now(),
        }
    }
}

/// Terminal result of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered { partition: i32, offset: i64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub key: String,
    pub outcome: Outcome,
    pub latency: Duration,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, Outcome::Delivered { .. })
    }
}
