//! Subscription options
//!
//! These are the wire-relevant knobs a streaming subscription carries. The
//! names and defaults follow the streaming server's semantics exactly:
//! - `start_position`: where a brand new subscription starts reading. Only
//!   consulted the first time a durable subscription is created; a durable
//!   that already exists resumes from its stored position.
//! - `manual_ack`: the client acknowledges each message itself
//! - `ack_wait`: how long the server waits for an ack before redelivering
//! - `durable_name`: keeps the subscription's position across disconnects
//! - `max_in_flight`: cap on unacknowledged messages per subscriber

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server default for how long a delivered message may stay unacknowledged.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(5);

/// Server default for unacknowledged messages outstanding per subscriber.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "sequence", rename_all = "snake_case")]
pub enum StartPosition {
    /// Only messages published after the subscription is created.
    #[default]
    NewOnly,
    /// Every message the server still holds for the subject.
    AllAvailable,
    /// The most recent message, then everything after it.
    LastReceived,
    /// Starting at the given sequence number (1-based).
    AtSequence(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    pub durable_name: Option<String>,
    #[serde(with = "duration_ms")]
    pub ack_wait: Duration,
    pub start_position: StartPosition,
    pub manual_ack: bool,
    pub max_in_flight: usize,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            durable_name: None,
            ack_wait: DEFAULT_ACK_WAIT,
            start_position: StartPosition::NewOnly,
            manual_ack: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver_all_available(mut self) -> Self {
        self.start_position = StartPosition::AllAvailable;
        self
    }

    pub fn start_at(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    pub fn manual_ack_mode(mut self, manual: bool) -> Self {
        self.manual_ack = manual;
        self
    }

    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn durable_name(mut self, name: impl Into<String>) -> Self {
        self.durable_name = Some(name.into());
        self
    }

    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn is_durable(&self) -> bool {
        self.durable_name.is_some()
    }

    pub fn delivers_all_available(&self) -> bool {
        self.start_position == StartPosition::AllAvailable
    }
}

/// Ack wait travels as whole milliseconds on the wire.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
