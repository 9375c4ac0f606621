use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::broker::message::{Message, Payload};
use crate::broker::options::SubscriptionOptions;
use crate::utils::BrokerError;

/// A live connection to a streaming server.
///
/// Implementations own the network (or in-process) plumbing; `Connection`
/// in the `client` module layers the lifecycle on top.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a subscription. `queue_group` members share the subject's messages.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: &SubscriptionOptions,
    ) -> Result<Subscription, BrokerError>;

    async fn publish(&self, subject: &str, payload: Payload) -> Result<(), BrokerError>;

    /// Close the connection. Further deliveries stop; closing twice is a no-op.
    async fn close(&self) -> Result<(), BrokerError>;

    /// Flips to `true` once the connection is closed from either side.
    fn closed_signal(&self) -> watch::Receiver<bool>;
}

/// Receiving end of one subscription.
///
/// Yields `None` once the connection closes or the server drops the subscription.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    subject: String,
    queue_group: Option<String>,
    receiver: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        queue_group: Option<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            queue_group,
            receiver,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    pub async fn next_message(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn try_next_message(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}
