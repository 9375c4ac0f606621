//! In-memory streaming server
//!
//! This module contains an in-process stand-in for a durable streaming
//! server, used by tests and the local demo. It is responsible for:
//! - keeping an append-only log per subject
//! - fanning messages out to queue groups, one member per group
//! - tracking unacknowledged messages and redelivering them after `ack_wait`
//! - remembering durable group positions across client disconnects
//!
//! Nothing is persisted; dropping the server forgets everything.
//!
//! Concurrency and usage notes:
//! - All state sits behind one `std::sync::Mutex`. Deliveries go through
//!   unbounded channels, so the lock is never held across an await or a
//!   handler call.
//! - `run_redelivery_loop` is meant to be spawned as a background task. It
//!   never gives up on a message: an unacknowledged message is redelivered
//!   for as long as the server runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::channel::{
    Channel, Member, PendingMessage, QueueGroup, StoredMessage, SubscriptionId,
};
use crate::broker::message::{Ack, AckSink, Delivery, Message, Payload};
use crate::broker::options::SubscriptionOptions;
use crate::broker::transport::{StreamTransport, Subscription};
use crate::utils::BrokerError;

#[derive(Debug)]
struct SubscriptionRecord {
    subject: String,
    group: String,
    client_id: String,
}

struct Engine {
    channels: HashMap<String, Channel>,
    subscriptions: HashMap<SubscriptionId, SubscriptionRecord>,
    clients: HashMap<String, watch::Sender<bool>>,
    acker: Arc<dyn AckSink>,
}

impl Engine {
    fn new(acker: Arc<dyn AckSink>) -> Self {
        Self {
            channels: HashMap::new(),
            subscriptions: HashMap::new(),
            clients: HashMap::new(),
            acker,
        }
    }

    fn connect(&mut self, client_id: &str) -> Result<watch::Receiver<bool>, BrokerError> {
        if self.clients.contains_key(client_id) {
            return Err(BrokerError::DuplicateClientId(client_id.to_string()));
        }
        let (closed_tx, closed_rx) = watch::channel(false);
        self.clients.insert(client_id.to_string(), closed_tx);
        info!("client {client_id} connected");
        Ok(closed_rx)
    }

    fn disconnect(&mut self, client_id: &str, now: Instant) -> bool {
        let Some(closed) = self.clients.remove(client_id) else {
            return false;
        };

        let owned: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, record)| record.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();

        for subscription_id in owned {
            let Some(record) = self.subscriptions.remove(&subscription_id) else {
                continue;
            };
            let Some(channel) = self.channels.get_mut(&record.subject) else {
                continue;
            };
            let Channel { subject, log, groups } = channel;

            let dispose = match groups.get_mut(&record.group) {
                Some(group) => {
                    group.leave(&subscription_id);
                    if !group.is_disposable() {
                        pump(subject, log, group, &self.acker, now);
                    }
                    group.is_disposable()
                }
                None => false,
            };
            if dispose {
                groups.remove(&record.group);
                debug!("dropped empty group {} on {}", record.group, subject);
            }
        }

        closed.send_replace(true);
        info!("client {client_id} disconnected");
        true
    }

    fn subscribe(
        &mut self,
        client_id: &str,
        subject: &str,
        queue_group: Option<&str>,
        options: &SubscriptionOptions,
        now: Instant,
    ) -> Result<Subscription, BrokerError> {
        if !self.clients.contains_key(client_id) {
            return Err(BrokerError::ConnectionClosed);
        }

        let subscription_id = Uuid::new_v4().to_string();
        let group_name = match (queue_group, options.durable_name.as_deref()) {
            (Some(queue), _) => queue.to_string(),
            (None, Some(durable)) => format!("{client_id}:{durable}"),
            (None, None) => subscription_id.clone(),
        };

        let channel = self
            .channels
            .entry(subject.to_string())
            .or_insert_with(|| Channel::new(subject));
        let log_len = channel.last_sequence();
        let Channel { log, groups, .. } = channel;

        let group = groups.entry(group_name.clone()).or_insert_with(|| {
            debug!("creating group {group_name} on {subject} at {:?}", options.start_position);
            QueueGroup::new(
                &group_name,
                options.is_durable(),
                options.ack_wait,
                options.max_in_flight,
                options.manual_ack,
                options.start_position,
                log_len,
            )
        });
        if group.durable && group.members.is_empty() && group.last_sent > 0 {
            info!(
                "resuming durable group {} on {} after sequence {}",
                group.name, subject, group.last_sent
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        group.join(Member {
            subscription_id: subscription_id.clone(),
            client_id: client_id.to_string(),
            sender: tx,
        });
        pump(subject, log, group, &self.acker, now);

        self.subscriptions.insert(
            subscription_id.clone(),
            SubscriptionRecord {
                subject: subject.to_string(),
                group: group_name,
                client_id: client_id.to_string(),
            },
        );

        info!("{client_id} subscribed to {subject} as {subscription_id}");
        Ok(Subscription::new(
            subscription_id,
            subject,
            queue_group.map(str::to_string),
            rx,
        ))
    }

    fn publish(&mut self, subject: &str, payload: Payload, now: Instant) -> u64 {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let channel = self
            .channels
            .entry(subject.to_string())
            .or_insert_with(|| Channel::new(subject));
        let sequence = channel.append(payload, timestamp);

        let Channel { log, groups, .. } = channel;
        for group in groups.values_mut() {
            pump(subject, log, group, &self.acker, now);
        }

        debug!("published {subject} #{sequence}");
        sequence
    }

    fn ack(&mut self, ack: &Ack, now: Instant) {
        let Some(record) = self.subscriptions.get(&ack.subscription_id) else {
            debug!(
                "ignoring ack for {} #{} from unknown subscription {}",
                ack.subject, ack.sequence, ack.subscription_id
            );
            return;
        };
        let Some(channel) = self.channels.get_mut(&record.subject) else {
            return;
        };
        let Channel { subject, log, groups } = channel;
        let Some(group) = groups.get_mut(&record.group) else {
            return;
        };

        if group.pending.remove(&ack.sequence).is_some() {
            debug!("ack received for {subject} #{}", ack.sequence);
            pump(subject, log, group, &self.acker, now);
        } else {
            debug!("received ack for unknown sequence {subject} #{}", ack.sequence);
        }
    }

    fn redeliver_expired(&mut self, now: Instant) -> usize {
        let mut resent = 0;

        for channel in self.channels.values_mut() {
            let Channel { subject, log, groups } = channel;

            for group in groups.values_mut() {
                let expired: Vec<u64> = group
                    .pending
                    .iter()
                    .filter(|(_, p)| now.duration_since(p.sent_at) >= group.ack_wait)
                    .map(|(seq, _)| *seq)
                    .collect();

                for sequence in expired {
                    let Some(stored) = log.get((sequence - 1) as usize) else {
                        group.pending.remove(&sequence);
                        continue;
                    };
                    if redeliver(subject, stored, group, &self.acker, now) {
                        resent += 1;
                    }
                }
            }
        }

        resent
    }
}

/// Hand out as many not-yet-sent log entries as the group's members can take.
fn pump(
    subject: &str,
    log: &[StoredMessage],
    group: &mut QueueGroup,
    acker: &Arc<dyn AckSink>,
    now: Instant,
) -> usize {
    let mut sent = 0;

    while (group.last_sent as usize) < log.len() {
        let Some(idx) = group.pick_member(group.manual_ack) else {
            break;
        };
        let stored = &log[group.last_sent as usize];
        let member = group.members[idx].subscription_id.clone();

        if send(subject, stored, false, group, idx, acker) {
            if group.manual_ack {
                group.pending.insert(
                    stored.sequence,
                    PendingMessage {
                        member,
                        sent_at: now,
                        deliveries: 1,
                    },
                );
            }
            group.last_sent += 1;
            sent += 1;
        }
        // a failed send dropped the dead member; try the rest
    }

    sent
}

fn redeliver(
    subject: &str,
    stored: &StoredMessage,
    group: &mut QueueGroup,
    acker: &Arc<dyn AckSink>,
    now: Instant,
) -> bool {
    while let Some(idx) = group.pick_member(false) {
        let member = group.members[idx].subscription_id.clone();
        if send(subject, stored, true, group, idx, acker) {
            if let Some(pending) = group.pending.get_mut(&stored.sequence) {
                info!(
                    "re-sending {subject} #{} to {member}, delivery {}",
                    stored.sequence,
                    pending.deliveries + 1
                );
                pending.member = member;
                pending.sent_at = now;
                pending.deliveries += 1;
            }
            return true;
        }
    }
    false
}

fn send(
    subject: &str,
    stored: &StoredMessage,
    redelivered: bool,
    group: &mut QueueGroup,
    idx: usize,
    acker: &Arc<dyn AckSink>,
) -> bool {
    let member = &group.members[idx];
    let message = Message::new(
        Delivery {
            subject: subject.to_string(),
            sequence: stored.sequence,
            timestamp: stored.timestamp,
            redelivered,
            payload: stored.payload.clone(),
        },
        member.subscription_id.clone(),
        acker.clone(),
    );

    if let Err(e) = member.sender.send(message) {
        let id = member.subscription_id.clone();
        warn!("failed to send {subject} #{} to {id}: {e}", stored.sequence);
        group.leave(&id);
        return false;
    }
    true
}

/// Routes acks from delivered messages back into the engine.
struct EngineAcker {
    engine: Weak<Mutex<Engine>>,
}

impl AckSink for EngineAcker {
    fn ack(&self, ack: Ack) -> Result<(), BrokerError> {
        let engine = self.engine.upgrade().ok_or(BrokerError::ConnectionClosed)?;
        engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ack(&ack, Instant::now());
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryStreamingServer {
    cluster_id: String,
    engine: Arc<Mutex<Engine>>,
}

impl std::fmt::Debug for InMemoryStreamingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStreamingServer")
            .field("cluster_id", &self.cluster_id)
            .finish()
    }
}

impl InMemoryStreamingServer {
    /// How often the background loop looks for expired acks by default.
    pub const REDELIVERY_INTERVAL: Duration = Duration::from_millis(250);

    pub fn new(cluster_id: impl Into<String>) -> Self {
        let engine = Arc::new_cyclic(|weak: &Weak<Mutex<Engine>>| {
            let acker: Arc<dyn AckSink> = Arc::new(EngineAcker {
                engine: weak.clone(),
            });
            Mutex::new(Engine::new(acker))
        });

        Self {
            cluster_id: cluster_id.into(),
            engine,
        }
    }

    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Register a client. Ids must be unique among connected clients.
    pub fn connect(
        &self,
        cluster_id: &str,
        client_id: &str,
    ) -> Result<Arc<MemoryTransport>, BrokerError> {
        if cluster_id != self.cluster_id {
            return Err(BrokerError::UnknownCluster(cluster_id.to_string()));
        }
        let closed = self.engine().connect(client_id)?;

        Ok(Arc::new(MemoryTransport {
            server: self.clone(),
            client_id: client_id.to_string(),
            closed,
        }))
    }

    /// Drop a client and all its subscriptions. Returns false for unknown ids.
    pub fn disconnect(&self, client_id: &str) -> bool {
        self.engine().disconnect(client_id, Instant::now())
    }

    /// Append to the subject's log and dispatch. Returns the new sequence number.
    pub fn publish(&self, subject: &str, payload: impl Into<Payload>) -> u64 {
        self.engine().publish(subject, payload.into(), Instant::now())
    }

    pub fn redeliver_expired(&self) -> usize {
        self.redeliver_expired_at(Instant::now())
    }

    /// Redeliver every pending message whose ack wait has elapsed by `now`.
    pub fn redeliver_expired_at(&self, now: Instant) -> usize {
        self.engine().redeliver_expired(now)
    }

    pub async fn run_redelivery_loop(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let resent = self.redeliver_expired();
            if resent > 0 {
                debug!("redelivered {resent} expired messages");
            }
        }
    }

    pub fn last_sequence(&self, subject: &str) -> u64 {
        self.engine()
            .channels
            .get(subject)
            .map_or(0, Channel::last_sequence)
    }

    pub fn has_group(&self, subject: &str, group: &str) -> bool {
        self.engine()
            .channels
            .get(subject)
            .is_some_and(|c| c.groups.contains_key(group))
    }

    pub fn member_count(&self, subject: &str, group: &str) -> usize {
        self.engine()
            .channels
            .get(subject)
            .and_then(|c| c.groups.get(group))
            .map_or(0, |g| g.members.len())
    }

    pub fn pending_count(&self, subject: &str, group: &str) -> usize {
        self.engine()
            .channels
            .get(subject)
            .and_then(|c| c.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.engine().clients.contains_key(client_id)
    }
}

/// A client's connection to an [`InMemoryStreamingServer`].
pub struct MemoryTransport {
    server: InMemoryStreamingServer,
    client_id: String,
    closed: watch::Receiver<bool>,
}

impl MemoryTransport {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if *self.closed.borrow() {
            return Err(BrokerError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for MemoryTransport {
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: &SubscriptionOptions,
    ) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        self.server.engine().subscribe(
            &self.client_id,
            subject,
            queue_group,
            options,
            Instant::now(),
        )
    }

    async fn publish(&self, subject: &str, payload: Payload) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.server.publish(subject, payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.server.disconnect(&self.client_id);
        Ok(())
    }

    fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }
}
