use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::broker::{DEFAULT_ACK_WAIT, DEFAULT_MAX_IN_FLIGHT, Message};
use crate::events::{TicketCreatedData, TicketCreatedEvent};
use crate::listener::Listener;
use crate::utils::ListenerError;

#[derive(Debug, Clone)]
pub struct TicketCreatedListener {
    ack_wait: Duration,
    max_in_flight: usize,
}

impl TicketCreatedListener {
    pub const QUEUE_GROUP: &'static str = "payments-service";

    pub fn new() -> Self {
        Self {
            ack_wait: DEFAULT_ACK_WAIT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

impl Default for TicketCreatedListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Listener for TicketCreatedListener {
    type Event = TicketCreatedEvent;

    fn queue_group_name(&self) -> &str {
        Self::QUEUE_GROUP
    }

    fn ack_wait(&self) -> Duration {
        self.ack_wait
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    async fn on_message(&self, data: TicketCreatedData, msg: Message) -> Result<(), ListenerError> {
        info!(
            id = %data.id,
            title = %data.title,
            price = data.price,
            "Event data!"
        );
        msg.ack()?;
        Ok(())
    }
}
