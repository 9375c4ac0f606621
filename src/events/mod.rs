//! Event definitions shared by publishers and listeners.
//!
//! An `Event` ties a subject to the payload shape carried on it. Producers
//! and consumers agree on that shape out of band; the payload travels as
//! UTF-8 JSON with no schema or version negotiation.

pub mod subjects;
pub mod ticket_created;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use subjects::Subjects;
pub use ticket_created::{TicketCreatedData, TicketCreatedEvent};

pub trait Event: Send + Sync + 'static {
    const SUBJECT: Subjects;
    type Data: Serialize + DeserializeOwned + Send + Sync + 'static;
}
