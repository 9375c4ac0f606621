//! # stanlisten
//!
//! `stanlisten` is a small listener abstraction for durable streaming
//! pub/sub. Services subscribe to named subjects, receive at-least-once
//! delivery with manual acknowledgment, and share work across instances
//! through durable queue groups. Delivery guarantees come from the
//! streaming server; this crate only configures and consumes them.
//!
//! ## Core Modules
//!
//! - `listener`: the `Listener` contract, subscription setup and payload dispatch.
//! - `publisher`: the matching `Publisher` contract for producing events.
//! - `events`: subjects and the payload type carried on each.
//! - `client`: the process's `Connection` and its close lifecycle.
//! - `broker`: subscription options, delivered messages, the `StreamTransport`
//!   seam and an in-memory streaming server.
//! - `transport`: `StreamTransport` over a WebSocket.
//! - `config`: layered settings loading.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod events;
pub mod listener;
pub mod publisher;
pub mod transport;
pub mod utils;
