//! Channel and queue group state
//!
//! A `Channel` is the append-only log of one subject plus every group
//! reading from it. A `QueueGroup` tracks, for one group of subscribers:
//! - which members are attached and whose turn it is
//! - how far into the log it has handed messages out (`last_sent`)
//! - which handed-out messages still wait for an ack (`pending`)
//!
//! Groups are exclusive readers: every message in the log reaches exactly
//! one member of each group (redeliveries aside). A plain subscription is a
//! group with a single member.
//!
//! Callers synchronize access through the server lock.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::broker::message::{Message, Payload};
use crate::broker::options::StartPosition;

pub type SubscriptionId = String;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub sequence: u64,
    pub timestamp: i64,
    pub payload: Payload,
}

#[derive(Debug)]
pub struct Member {
    pub subscription_id: SubscriptionId,
    pub client_id: String,
    pub sender: UnboundedSender<Message>,
}

#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub member: SubscriptionId,
    pub sent_at: Instant,
    pub deliveries: u32,
}

#[derive(Debug)]
pub struct QueueGroup {
    pub name: String,
    pub durable: bool,
    pub ack_wait: Duration,
    pub max_in_flight: usize,
    pub manual_ack: bool,
    pub members: Vec<Member>,
    pub next_member: usize,
    pub last_sent: u64,
    pub pending: BTreeMap<u64, PendingMessage>,
}

impl QueueGroup {
    /// Create a group positioned according to `start` over a log of `log_len` messages.
    ///
    /// Without `manual_ack` a message counts as acknowledged as soon as it is sent.
    pub fn new(
        name: &str,
        durable: bool,
        ack_wait: Duration,
        max_in_flight: usize,
        manual_ack: bool,
        start: StartPosition,
        log_len: u64,
    ) -> Self {
        let last_sent = match start {
            StartPosition::AllAvailable => 0,
            StartPosition::NewOnly => log_len,
            StartPosition::LastReceived => log_len.saturating_sub(1),
            StartPosition::AtSequence(seq) => seq.saturating_sub(1).min(log_len),
        };

        Self {
            name: name.to_string(),
            durable,
            ack_wait,
            max_in_flight: max_in_flight.max(1),
            manual_ack,
            members: Vec::new(),
            next_member: 0,
            last_sent,
            pending: BTreeMap::new(),
        }
    }

    pub fn join(&mut self, member: Member) {
        self.members.push(member);
    }

    /// Detach a member. Its pending messages stay pending and are redelivered
    /// to someone else once they expire.
    pub fn leave(&mut self, subscription_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.subscription_id != subscription_id);
        if self.next_member >= self.members.len() {
            self.next_member = 0;
        }
        before != self.members.len()
    }

    pub fn in_flight(&self, subscription_id: &str) -> usize {
        self.pending
            .values()
            .filter(|p| p.member == subscription_id)
            .count()
    }

    /// Round-robin pick of the next member allowed to take another message.
    pub fn pick_member(&mut self, respect_in_flight: bool) -> Option<usize> {
        let count = self.members.len();
        for offset in 0..count {
            let idx = (self.next_member + offset) % count;
            let id = &self.members[idx].subscription_id;
            if !respect_in_flight || self.in_flight(id) < self.max_in_flight {
                self.next_member = (idx + 1) % count;
                return Some(idx);
            }
        }
        None
    }

    pub fn is_disposable(&self) -> bool {
        !self.durable && self.members.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Channel {
    pub subject: String,
    pub log: Vec<StoredMessage>,
    pub groups: HashMap<String, QueueGroup>,
}

impl Channel {
    pub fn new(subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            log: Vec::new(),
            groups: HashMap::new(),
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.log.len() as u64
    }

    /// Append a message and return its sequence number.
    pub fn append(&mut self, payload: Payload, timestamp: i64) -> u64 {
        let sequence = self.last_sequence() + 1;
        self.log.push(StoredMessage {
            sequence,
            timestamp,
            payload,
        });
        sequence
    }
}
