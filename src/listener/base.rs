//! Base listener
//!
//! A `Listener` names a subject and a queue group and handles the decoded
//! payloads that arrive on them. Everything about how the subscription is
//! configured lives here so every service subscribes the same way:
//! - deliver all available messages the first time the group is created
//! - manual acknowledgment, with the handler solely responsible for acking
//! - a durable name equal to the queue group, so a restarted instance of the
//!   group resumes where the group left off
//!
//! Failures are never retried here. A payload that does not decode or a
//! handler that errors leaves the message unacknowledged and the server
//! redelivers it after the ack wait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::broker::{DEFAULT_ACK_WAIT, DEFAULT_MAX_IN_FLIGHT, Message, Payload, SubscriptionOptions};
use crate::client::Connection;
use crate::events::{Event, Subjects};
use crate::utils::{BrokerError, DecodeError, ListenerError};

/// Payload type a listener for `E` receives.
pub type EventData<E> = <E as Event>::Data;

#[async_trait]
pub trait Listener: Send + Sync + 'static {
    type Event: Event;

    fn subject(&self) -> Subjects {
        <Self::Event as Event>::SUBJECT
    }

    fn queue_group_name(&self) -> &str;

    fn ack_wait(&self) -> Duration {
        DEFAULT_ACK_WAIT
    }

    fn max_in_flight(&self) -> usize {
        DEFAULT_MAX_IN_FLIGHT
    }

    fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions::new()
            .deliver_all_available()
            .manual_ack_mode(true)
            .ack_wait(self.ack_wait())
            .max_in_flight(self.max_in_flight())
            .durable_name(self.queue_group_name())
    }

    /// Handle one decoded message. Call `msg.ack()` once the work is done.
    async fn on_message(
        &self,
        data: EventData<Self::Event>,
        msg: Message,
    ) -> Result<(), ListenerError>;
}

/// A running subscription started by [`start_listening`].
#[derive(Debug)]
pub struct ListenerHandle {
    subscription_id: String,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the subscription ends, which happens when the connection closes.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            error!("listener task for {} failed: {e}", self.subscription_id);
        }
    }
}

/// Subscribe `listener` on `connection` and dispatch every delivery to it.
///
/// Each call opens a new subscription; calling twice yields two
/// subscriptions in the same queue group. Each delivered message is handled
/// on its own task, so handlers for different messages may overlap.
pub async fn start_listening<L: Listener>(
    listener: Arc<L>,
    connection: &Connection,
) -> Result<ListenerHandle, BrokerError> {
    let subject = listener.subject();
    let queue_group = listener.queue_group_name().to_string();
    let options = listener.subscription_options();

    let mut subscription = connection
        .subscribe(subject.as_str(), Some(&queue_group), &options)
        .await?;
    let subscription_id = subscription.id().to_string();

    let task = tokio::spawn(async move {
        while let Some(msg) = subscription.next_message().await {
            info!("Message received: {subject} / {queue_group}");

            let listener = listener.clone();
            tokio::spawn(async move {
                let sequence = msg.sequence();
                if let Err(e) = dispatch(listener.as_ref(), msg).await {
                    error!("{subject} #{sequence} left unacknowledged: {e}");
                }
            });
        }
        debug!("subscription {} on {subject} ended", subscription.id());
    });

    Ok(ListenerHandle {
        subscription_id,
        task,
    })
}

/// Decode `msg` for `listener` and hand it over. Never acknowledges on its own.
pub async fn dispatch<L: Listener>(listener: &L, msg: Message) -> Result<(), ListenerError> {
    let data = parse_message::<EventData<L::Event>>(&msg)?;
    listener.on_message(data, msg).await
}

pub fn parse_message<T: DeserializeOwned>(msg: &Message) -> Result<T, DecodeError> {
    parse_payload(msg.data())
}

/// Text is parsed as JSON directly; bytes are read as UTF-8 first.
pub fn parse_payload<T: DeserializeOwned>(payload: &Payload) -> Result<T, DecodeError> {
    match payload {
        Payload::Text(text) => Ok(serde_json::from_str(text)?),
        Payload::Binary(bytes) => {
            let text = std::str::from_utf8(bytes)?;
            Ok(serde_json::from_str(text)?)
        }
    }
}

/// Method-call form of [`start_listening`].
#[async_trait]
pub trait ListenerExt: Listener + Sized {
    async fn listen(self: Arc<Self>, connection: &Connection) -> Result<ListenerHandle, BrokerError>;
}

#[async_trait]
impl<L: Listener> ListenerExt for L {
    async fn listen(self: Arc<Self>, connection: &Connection) -> Result<ListenerHandle, BrokerError> {
        start_listening(self, connection).await
    }
}
