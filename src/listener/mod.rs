//! Listeners: the subscription side of an event.
//!
//! `base` holds the `Listener` contract and the machinery that subscribes a
//! listener and dispatches decoded payloads to it. Concrete listeners live
//! next to it, one per subject.

pub mod base;
pub mod ticket_created;

pub use base::{
    EventData, Listener, ListenerExt, ListenerHandle, dispatch, parse_message, parse_payload,
    start_listening,
};
pub use ticket_created::TicketCreatedListener;

#[cfg(test)]
mod tests;
