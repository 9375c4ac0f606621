//! Publishers: the producing side of an event.
//!
//! A `Publisher` serializes its event's data to JSON and publishes it as
//! text on the event's subject, which is exactly what listeners decode.

use async_trait::async_trait;
use tracing::info;

use crate::client::Connection;
use crate::events::{Event, Subjects, TicketCreatedEvent};
use crate::listener::EventData;
use crate::utils::PublishError;

#[async_trait]
pub trait Publisher: Send + Sync {
    type Event: Event;

    fn subject(&self) -> Subjects {
        <Self::Event as Event>::SUBJECT
    }

    async fn publish(
        &self,
        connection: &Connection,
        data: &EventData<Self::Event>,
    ) -> Result<(), PublishError> {
        let subject = self.subject();
        let body = serde_json::to_string(data)?;
        connection.publish(subject.as_str(), body).await?;
        info!("Event published to subject {subject}");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TicketCreatedPublisher;

impl Publisher for TicketCreatedPublisher {
    type Event = TicketCreatedEvent;
}
