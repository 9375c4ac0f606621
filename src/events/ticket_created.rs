use serde::{Deserialize, Serialize};

use crate::events::{Event, Subjects};

pub struct TicketCreatedEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketCreatedData {
    pub id: String,
    pub title: String,
    pub price: f64,
}

impl Event for TicketCreatedEvent {
    const SUBJECT: Subjects = Subjects::TicketCreated;
    type Data = TicketCreatedData;
}
