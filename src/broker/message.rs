//! Inbound messages
//!
//! A `Delivery` is the plain data the server hands over for one message:
//! - `subject`: the subject it was published on
//! - `sequence`: the server-assigned, per-subject sequence number (1-based)
//! - `timestamp`: milliseconds since UNIX epoch, set by the server on publish
//! - `redelivered`: true when this is not the first delivery attempt
//! - `payload`: the raw body, either text or bytes
//!
//! A `Message` wraps a delivery together with the subscription it arrived on
//! and a handle used to acknowledge it. Nothing acknowledges a message
//! implicitly; an unacknowledged message is redelivered once its subscription's
//! ack wait elapses.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::utils::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub subject: String,
    pub sequence: u64,
    pub timestamp: i64,
    pub redelivered: bool,
    pub payload: Payload,
}

/// Acknowledgment of one delivered message on one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub subscription_id: String,
    pub subject: String,
    pub sequence: u64,
}

/// Where acknowledgments go. Implemented by each transport.
pub trait AckSink: Send + Sync {
    fn ack(&self, ack: Ack) -> Result<(), BrokerError>;
}

#[derive(Clone)]
pub struct Message {
    delivery: Delivery,
    subscription_id: String,
    acker: Arc<dyn AckSink>,
}

impl Message {
    pub fn new(delivery: Delivery, subscription_id: impl Into<String>, acker: Arc<dyn AckSink>) -> Self {
        Self {
            delivery,
            subscription_id: subscription_id.into(),
            acker,
        }
    }

    pub fn subject(&self) -> &str {
        &self.delivery.subject
    }

    pub fn sequence(&self) -> u64 {
        self.delivery.sequence
    }

    pub fn timestamp(&self) -> i64 {
        self.delivery.timestamp
    }

    pub fn is_redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    pub fn data(&self) -> &Payload {
        &self.delivery.payload
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Acknowledge this message so the server stops redelivering it.
    ///
    /// Acking twice is harmless; the server ignores acks it no longer tracks.
    pub fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack(Ack {
            subscription_id: self.subscription_id.clone(),
            subject: self.delivery.subject.clone(),
            sequence: self.delivery.sequence,
        })
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.delivery.subject)
            .field("sequence", &self.delivery.sequence)
            .field("redelivered", &self.delivery.redelivered)
            .field("subscription_id", &self.subscription_id)
            .field("payload_len", &self.delivery.payload.len())
            .finish()
    }
}
